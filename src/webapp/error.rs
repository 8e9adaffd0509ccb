//! Error taxonomy for the engine.
//!
//! # Design Decisions
//! - Configuration conflicts are returned synchronously from registration
//!   calls and leave registries untouched.
//! - Resolution failures are ordinary values; the front door maps them to 404.
//! - Handlers and filters report failures through [`ServiceError`], which the
//!   front door turns into an error dispatch or a plain status response.

use thiserror::Error;

/// Errors raised by the engine itself.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A handler or filter with this name already exists in the application.
    #[error("{kind} '{name}' is already registered")]
    DuplicateRegistration { kind: &'static str, name: String },

    /// The pattern is already bound to a different handler.
    #[error("pattern '{pattern}' is already mapped to handler '{existing}'")]
    MappingConflict { pattern: String, existing: String },

    /// The URL pattern is not exact, path-prefix, extension or default.
    #[error("invalid url pattern '{pattern}'")]
    InvalidPattern { pattern: String },

    /// An init parameter name or value was rejected.
    #[error("invalid parameter: {reason}")]
    InvalidParameter { reason: String },

    /// A mapping or dispatcher referred to a handler that is not registered.
    #[error("no handler named '{name}'")]
    UnknownHandler { name: String },

    /// Registries are frozen once the application is running.
    #[error("application '{context_path}' is already initialized")]
    AlreadyInitialized { context_path: String },

    /// An illegal lifecycle transition was requested.
    #[error("application '{context_path}' cannot move from {from} to {to}")]
    Lifecycle {
        context_path: String,
        from: &'static str,
        to: &'static str,
    },

    /// No deployed application owns the request path.
    #[error("no application serves '{path}'")]
    NoSuchApplication { path: String },

    /// The application exists but nothing is mapped to the path.
    #[error("no resource at '{path}' in application '{context_path}'")]
    NoSuchResource { context_path: String, path: String },

    /// Constructing or initializing a handler or filter failed.
    #[error("unable to initialize '{name}': {source}")]
    Initialization {
        name: String,
        #[source]
        source: InstantiationError,
    },

    /// The component was destroyed when its application stopped.
    #[error("'{name}' is unavailable: application stopped")]
    Unavailable { name: String },

    /// A dispatch was attempted in a state that does not support it.
    #[error("dispatch error: {0}")]
    DispatchState(String),

    /// A session operation needed an active session.
    #[error("session error: {0}")]
    SessionState(String),

    /// A configuration value is outside its accepted domain.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl EngineError {
    /// True for resolution failures that should become a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::NoSuchApplication { .. } | EngineError::NoSuchResource { .. }
        )
    }
}

/// Failure reported by the Instantiator or by a component's `init`.
#[derive(Debug, Error)]
pub enum InstantiationError {
    /// No factory is registered for the class reference.
    #[error("unknown class '{0}'")]
    UnknownClass(String),

    /// The factory ran but refused to build the component.
    #[error("construction failed: {0}")]
    Construction(String),

    /// The component was built but its `init` failed.
    #[error("init failed: {0}")]
    Init(#[from] Box<ServiceError>),
}

/// Error returned by handlers and filters.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Respond with the given status (and optional message).
    #[error("status {status}: {message}")]
    Status { status: u16, message: String },

    /// Generic processing failure, reported as 500.
    #[error("{0}")]
    Failed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Shorthand for [`ServiceError::Status`].
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        ServiceError::Status {
            status,
            message: message.into(),
        }
    }

    /// Status code the front door should use for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::Status { status, .. } => *status,
            ServiceError::Engine(e) if e.is_not_found() => 404,
            ServiceError::Engine(EngineError::Unavailable { .. }) => 503,
            _ => 500,
        }
    }

    /// Name used to look this failure up in the error-page table.
    pub fn fault_type(&self) -> &'static str {
        match self {
            ServiceError::Status { .. } => "status",
            ServiceError::Failed(_) => "failed",
            ServiceError::Engine(_) => "engine",
            ServiceError::Io(_) => "io",
        }
    }
}

/// Result type returned by handlers and filters.
pub type ServiceResult = Result<(), ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        let err = EngineError::NoSuchResource {
            context_path: "/app".into(),
            path: "/missing".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(ServiceError::from(err).status_code(), 404);

        let err = EngineError::DispatchState("nope".into());
        assert!(!err.is_not_found());
        assert_eq!(ServiceError::from(err).status_code(), 500);
    }

    #[test]
    fn test_init_failure_keeps_service_error() {
        let err = InstantiationError::from(Box::new(ServiceError::Failed("no database".into())));
        assert_eq!(err.to_string(), "init failed: no database");
        let err = EngineError::Initialization {
            name: "store".into(),
            source: err,
        };
        assert!(err.to_string().contains("no database"));
        assert_eq!(ServiceError::from(err).status_code(), 500);
    }

    #[test]
    fn test_initialization_message_names_component() {
        let err = EngineError::Initialization {
            name: "broken".into(),
            source: InstantiationError::UnknownClass("com.example.Missing".into()),
        };
        let msg = err.to_string();
        assert!(msg.contains("broken"));
        assert!(msg.contains("com.example.Missing"));
    }
}
