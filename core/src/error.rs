use thiserror::Error;

/// Typed failures surfaced by the scheduling engine and the service layer.
///
/// These travel inside `anyhow::Error` through the database and service code;
/// front ends recover them with `downcast_ref` to pick a status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TrackerError {
    #[error("Invalid tracker configuration: {0}")]
    InvalidConfig(String),

    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("Not authenticated")]
    Unauthorized,

    #[error("Tracker belongs to another user")]
    Forbidden,

    #[error("Date out of range: {0}")]
    OutOfRange(String),
}

impl TrackerError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidConfig(reason.into())
    }

    pub fn tracker_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "Tracker",
            id: id.to_string(),
        }
    }

    pub fn completion_not_found(id: &str) -> Self {
        Self::NotFound {
            entity: "Completion",
            id: id.to_string(),
        }
    }
}

/// Find a [`TrackerError`] anywhere in an `anyhow` error chain.
#[must_use]
pub fn tracker_error(err: &anyhow::Error) -> Option<&TrackerError> {
    err.chain().find_map(|cause| cause.downcast_ref::<TrackerError>())
}
