use iced::{
    widget::{button, column, row, text},
    Element, Task, Theme,
};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};

use crate::{
    api::{OllamaClient, DEFAULT_ENDPOINT},
    config::Config,
};

mod chat;
mod metrics;
mod settings;

pub fn init() -> (LocalChat, Task<Message>) {
    LocalChat::with_config(Config::load())
}

#[derive(Debug)]
pub struct LocalChat {
    current_page: PageId,
    chat: chat::State,
    pub settings: settings::State,
}

impl LocalChat {
    pub fn with_config(config: Config) -> (Self, Task<Message>) {
        let (client, warning) = connect(&config.endpoint);
        let (mut chat_state, chat_task) = chat::State::new(client, &config);
        if let Some(warning) = warning {
            chat_state.notify(warning);
        }
        let state = Self {
            current_page: PageId::default(),
            chat: chat_state,
            settings: settings::State::new(config),
        };
        let task = chat_task.map(Message::Chat);
        (state, task)
    }
}

/// Builds a client for the configured endpoint, falling back to the local
/// default when the stored value does not parse.
fn connect(endpoint: &str) -> (Option<OllamaClient>, Option<String>) {
    match OllamaClient::new(endpoint) {
        Ok(client) => (Some(client), None),
        Err(err) => {
            let warning = format!(
                "Invalid endpoint '{}' ({}), using {}",
                endpoint, err, DEFAULT_ENDPOINT
            );
            match OllamaClient::new(DEFAULT_ENDPOINT) {
                Ok(client) => (Some(client), Some(warning)),
                Err(err) => (None, Some(format!("Could not create HTTP client: {}", err))),
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Navigate(PageId),
    Chat(chat::ChatAction),
    Settings(settings::Action),
}

#[derive(PartialEq, Eq, Clone, Copy, Debug, Default, Display, EnumIter)]
pub enum PageId {
    #[default]
    Chat,
    Settings,
}

pub fn update(state: &mut LocalChat, action: Message) -> Task<Message> {
    match action {
        Message::Navigate(page_id) => {
            state.current_page = page_id;
            Task::none()
        }
        Message::Chat(chat_action) => {
            let task = state.chat.update(chat_action);
            task.map(Message::Chat)
        }
        Message::Settings(settings_action) => match state.settings.update(settings_action) {
            Some(settings::Event::EndpointChanged(client)) => {
                state.chat.set_client(client).map(Message::Chat)
            }
            Some(settings::Event::StreamDefault(stream)) => {
                state.chat.set_stream_responses(stream);
                Task::none()
            }
            Some(settings::Event::MetricsDefault(show)) => {
                state.chat.set_show_metrics(show);
                Task::none()
            }
            None => Task::none(),
        },
    }
}

pub fn view(state: &LocalChat) -> Element<'_, Message> {
    let navigation = build_navigation_bar(state.current_page);

    let page_content = match state.current_page {
        PageId::Chat => state.chat.view(&state.settings.config.theme).map(Message::Chat),
        PageId::Settings => state.settings.view().map(Message::Settings),
    };

    column![navigation, page_content]
        .spacing(10)
        .padding(10)
        .into()
}

pub fn theme(state: &LocalChat) -> Theme {
    state.settings.config.theme.clone()
}

fn build_navigation_bar(current_page: PageId) -> Element<'static, Message> {
    row(PageId::iter().map(|page| {
        button(text(page.to_string()))
            .on_press_maybe((page != current_page).then_some(Message::Navigate(page)))
            .into()
    }))
    .spacing(10)
    .into()
}
