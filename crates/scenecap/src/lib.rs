//! scenecap: discover smart-lighting devices, capture the vendor control
//! messages their scenes produce, and replay them over the LAN.
//!
//! - [`capture`]: extract control messages from the capture log into the
//!   registries
//! - [`watcher`]: wait for the capture log to grow, with cancel and timeout
//! - [`instrument`]: start and stop the observer process
//! - [`cloud`] / [`lan`]: vendor cloud API and LAN UDP collaborators
//! - [`sync`]: cloud plus LAN refresh of the device registry
//! - [`config`] / [`env_file`]: runtime configuration
//!
//! The registries themselves live in `scenecap_registry`.

pub mod capture;
pub mod cloud;
pub mod config;
pub mod env_file;
pub mod instrument;
pub mod lan;
pub mod sync;
pub mod watcher;
