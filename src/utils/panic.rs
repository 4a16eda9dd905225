//! Turning captured panics into error text.

use std::any::Any;
use tokio::task::JoinError;

/// Extract the message carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "task panicked with a non-string payload".to_string()
    }
}

/// Describe why a spawned task did not complete
pub fn join_error_message(error: JoinError) -> String {
    if error.is_panic() {
        format!("task panicked: {}", panic_message(error.into_panic().as_ref()))
    } else {
        "task was cancelled before completion".to_string()
    }
}
