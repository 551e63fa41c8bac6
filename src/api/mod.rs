mod error;
pub mod ollama;
pub mod stream;

pub use error::QueryError;
pub use ollama::{ModelListing, OllamaClient, DEFAULT_ENDPOINT};
pub use stream::{Reply, StreamEvent};

/// Offered when the server cannot tell us what it has installed.
pub const FALLBACK_MODELS: [&str; 3] = ["llama3", "phi3", "mistral"];

pub fn fallback_models() -> Vec<String> {
    FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
}
