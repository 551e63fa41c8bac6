mod models;
mod state;
mod tasks;
pub use models::{ChatAction, ChatMessage};
pub use state::State;
pub use tasks::{complete_message, load_models};
