use thiserror::Error;

/// Everything that can go wrong talking to the model server.
///
/// The `Display` output is what ends up in the transcript and notifications,
/// so it stays stable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("Error connecting to Ollama: {0}")]
    Connection(String),
    #[error("Error: {0}")]
    Status(u16),
    #[error("Error fetching models: {0}")]
    ListingStatus(u16),
    #[error("Error decoding JSON: {0}")]
    Malformed(String),
    #[error("Ollama error: {0}")]
    Server(String),
}

impl From<reqwest::Error> for QueryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            QueryError::Malformed(err.to_string())
        } else {
            QueryError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::Malformed(err.to_string())
    }
}
