use thiserror::Error;

/// A lifecycle event that is not valid in the current state
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid transition: cannot apply '{event}' to {entity} in state '{from}'")]
pub struct TransitionError {
    pub entity: &'static str,
    pub from: String,
    pub event: &'static str,
}

impl TransitionError {
    pub fn new(entity: &'static str, from: impl ToString, event: &'static str) -> Self {
        Self {
            entity,
            from: from.to_string(),
            event,
        }
    }
}
