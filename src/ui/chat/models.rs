use iced::widget::markdown;
use url::Url;

use crate::{
    api::{ModelListing, StreamEvent},
    models::{Role, Turn},
};

/// A transcript turn with its markdown already parsed for rendering.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    pub markdown_items: Vec<markdown::Item>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl ToString) -> Self {
        let content = content.to_string();
        Self {
            role,
            markdown_items: markdown::parse(&content).collect(),
            content,
        }
    }
}

impl From<&Turn> for ChatMessage {
    fn from(turn: &Turn) -> Self {
        ChatMessage::new(turn.role, &turn.text)
    }
}

#[derive(Debug, Clone)]
pub enum ChatAction {
    InputChanged(String),
    SendMessage,
    Dispatch(StreamEvent),
    ModelSelected(String),
    ModelsLoaded(Url, ModelListing),
    RefreshModels,
    StreamToggled(bool),
    MetricsToggled(bool),
    ClearChat,
    DismissNotification(usize),
    UrlClicked(String),
}
