use thiserror::Error;

/// Every failure the engine can observe. None of them is fatal: each is
/// logged where it happens and the engine keeps running.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("subscription to '{topic}' failed: {reason}")]
    Subscription { topic: String, reason: String },

    #[error("publish to '{topic}' failed: {reason}")]
    Publish { topic: String, reason: String },

    #[error("malformed payload on '{topic}': {reason}")]
    MalformedPayload { topic: String, reason: String },

    #[error("transport not connected")]
    NotConnected,
}

impl LinkError {
    pub(crate) fn malformed(topic: &str, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            topic: topic.to_string(),
            reason: reason.to_string(),
        }
    }
}
