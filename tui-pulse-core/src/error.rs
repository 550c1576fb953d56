//! Error types shared across the runtime

use thiserror::Error;

/// Error returned by caller-supplied binding handlers and bus subscribers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for caller-supplied handlers.
pub type HandlerResult = Result<(), HandlerError>;

/// Error reported by a view lifecycle method.
pub type ViewError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the view/navigation system.
#[derive(Debug, Error)]
pub enum NavigationError {
    /// An operation ran before `initialize` was called
    #[error("Navigation system is not initialized")]
    NotInitialized,

    /// The view id was never registered
    #[error("Unknown view: {0}")]
    UnknownView(String),

    /// No tab references the given view id
    #[error("Unknown tab: {0}")]
    UnknownTab(String),

    /// A view with this id is already registered
    #[error("View already registered: {0}")]
    DuplicateView(String),

    /// A tab for this view already exists
    #[error("Tab already exists for view: {0}")]
    DuplicateTab(String),

    /// Tab navigation was requested but no tabs exist
    #[error("No tabs are open")]
    NoTabs,

    /// The top of the stack disallows going back, or nothing is below it
    #[error("Cannot go back from view: {0}")]
    CannotGoBack(String),

    /// A mount/unmount hook failed
    #[error("View {view} failed to {stage}: {source}")]
    Lifecycle {
        view: String,
        stage: &'static str,
        #[source]
        source: ViewError,
    },
}

impl NavigationError {
    pub(crate) fn lifecycle(view: &str, stage: &'static str, source: ViewError) -> Self {
        Self::Lifecycle {
            view: view.to_string(),
            stage,
            source,
        }
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The config text is not valid JSON for `RuntimeConfig`
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A field holds a value outside its accepted range
    #[error("Invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

/// Failures routed to the application loop's error callback.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The render callback returned an error
    #[error("Render failed on frame {frame}: {message}")]
    Render { frame: u64, message: String },

    /// The render callback panicked
    #[error("Render panicked on frame {frame}: {message}")]
    RenderPanic { frame: u64, message: String },

    /// Terminal capability detection or raw mode setup failed
    #[error("Terminal capability failure: {0}")]
    Capability(String),

    /// A background task or handler failed outside the render path
    #[error("Task failed: {0}")]
    Task(String),
}

/// Errors that abort the runtime entirely.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Terminal IO failed
    #[error("Terminal IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_error_unknown_view_formats_id() {
        let err = NavigationError::UnknownView("settings".into());
        assert_eq!(err.to_string(), "Unknown view: settings");
    }

    #[test]
    fn navigation_error_lifecycle_keeps_source() {
        let err = NavigationError::lifecycle("home", "mount", "boom".into());
        assert_eq!(err.to_string(), "View home failed to mount: boom");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn config_error_wraps_serde_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = ConfigError::from(json_err);
        assert!(err.to_string().contains("JSON error"));
    }

    #[test]
    fn panic_message_reads_str_and_string() {
        let a: Box<dyn std::any::Any + Send> = Box::new("static");
        let b: Box<dyn std::any::Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(a.as_ref()), "static");
        assert_eq!(panic_message(b.as_ref()), "owned");
        assert_eq!(panic_message(c.as_ref()), "unknown panic payload");
    }
}
