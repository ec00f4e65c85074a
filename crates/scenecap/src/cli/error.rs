//! Operator-facing errors
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// A registry has neither a file nor a template to seed it from
    pub fn missing_template(registry: &Path, template: &Path) -> Self {
        Self::new(format!("Template not found: {}", template.display()))
            .with_context(format!(
                "{} does not exist yet and is created from this template",
                registry.display()
            ))
            .with_suggestions([
                format!("TRY: Restore the template file: {}", template.display()),
                "TRY: Point SCENECAP_DEVICE_TEMPLATE / SCENECAP_COMMAND_TEMPLATE at a template in your .env".to_string(),
            ])
    }

    pub fn missing_api_key(env_file: &Path) -> Self {
        Self::new("No cloud API key configured")
            .with_context("Syncing devices and scenes needs the vendor cloud API")
            .with_suggestions([
                format!("TRY: Add GOVEE_API_KEY=\"...\" to {}", env_file.display()),
                "TRY: Run `scenecap` without a subcommand to be prompted for the key".to_string(),
            ])
    }

    pub fn no_instrument_cmd() -> Self {
        Self::new("No instrumentation command configured")
            .with_context("Capture runs an observer that logs the vendor app's control messages")
            .with_suggestion("TRY: Set SCENECAP_INSTRUMENT_CMD in your .env")
    }

    pub fn no_devices(registry: &Path) -> Self {
        Self::new("No devices in the registry")
            .with_context(format!("{} has no device declarations", registry.display()))
            .with_suggestion("TRY: scenecap sync")
    }

    pub fn unknown_device(name: &str) -> Self {
        Self::new(format!("Unknown device: {}", name))
            .with_suggestion("TRY: Pass a device name, registry variable or identifier")
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Replace a missing-template registry failure with its operator-facing form.
pub fn explain(err: anyhow::Error) -> anyhow::Error {
    match err.downcast_ref::<scenecap_registry::RegistryError>() {
        Some(scenecap_registry::RegistryError::MissingTemplate { registry, template }) => {
            HelpfulError::missing_template(registry, template).into()
        }
        _ => err,
    }
}
