//! Device and captured-command registries for scenecap.
//!
//! Both registries are plain text files that act as append-mostly databases:
//!
//! - **Device registry**: device declarations, the deduplicated scene table,
//!   and per-device association blocks (`scenes`, `commands`).
//! - **Command registry**: one record block per captured command payload,
//!   followed by an export list of every record key.
//!
//! Rewrites are line oriented so that comments and hand edits outside the
//! regenerated regions survive, and every rewrite lands through an atomic
//! temp-file-then-rename replace.

pub mod atomic;
pub mod command_registry;
pub mod device_registry;
pub mod error;
pub mod model;
pub mod rewrite;
pub mod sanitize;
pub mod syntax;

pub use command_registry::{CommandRegistry, UpsertOutcome};
pub use device_registry::{associations_from_records, DeviceDecl, DeviceRegistry};
pub use error::{RegistryError, Result};
pub use model::{
    CapturedCommand, CommandFields, Device, Scene, SceneCatalog, SceneRecord, DEFAULT_COMMAND_PORT,
};
pub use sanitize::{command_key, sanitize, scene_key};
