use std::time::Instant;

use iced::{
    widget::{
        button, column, container, markdown, pick_list, row, scrollable, text, text_input,
        toggler,
    },
    Alignment, Element, Length, Task, Theme,
};
use iced_aw::Spinner;
use url::Url;

use crate::{
    api::{ModelListing, OllamaClient, Reply, StreamEvent},
    config::Config,
    metrics::{MetricsLog, ReplyStats},
    models::{GenerateRequest, Role, Transcript},
    ui::{
        chat::{complete_message, load_models, ChatAction, ChatMessage},
        metrics,
    },
};

const WELCOME: &str = "👋 Welcome! Make sure Ollama is running locally before sending messages.";
const QUICK_START: &str = "Quick start:\n\
    1. Install Ollama from https://ollama.com\n\
    2. Run Ollama locally (ollama serve)\n\
    3. Pull a model: ollama pull llama3\n\
    4. Start chatting!";
const ABOUT: &str = "Runs open-source models locally through Ollama. \
    Make sure the server is running before you send a prompt.";
const MODEL_NOTES: [(&str, &str); 3] = [
    ("Llama3", "Meta's latest open-source LLM"),
    ("Phi3", "Microsoft's efficient small language model"),
    ("Mistral", "High-performance open-source LLM"),
];

#[derive(Debug, Clone)]
struct PendingQuery {
    model: String,
    started: Instant,
}

/// One chat session. Everything here lives only as long as the window.
#[derive(Debug, Default)]
pub struct State {
    client: Option<OllamaClient>,
    transcript: Transcript,
    messages: Vec<ChatMessage>,
    input_value: String,
    awaiting_response: bool,
    live_reply: Option<ChatMessage>,
    pending: Option<PendingQuery>,
    loading_models: bool,
    selected_model: Option<String>,
    available_models: Vec<String>,
    stream_responses: bool,
    show_metrics: bool,
    notifications: Vec<String>,
    metrics: MetricsLog,
}

impl State {
    pub fn new(client: Option<OllamaClient>, config: &Config) -> (Self, Task<ChatAction>) {
        let mut state = State {
            client,
            stream_responses: config.stream_responses,
            show_metrics: config.show_metrics,
            ..Default::default()
        };
        let task = state.refresh_models();
        (state, task)
    }

    /// Points the session at another server and reloads its models.
    pub fn set_client(&mut self, client: OllamaClient) -> Task<ChatAction> {
        self.client = Some(client);
        self.refresh_models()
    }

    pub fn set_stream_responses(&mut self, stream: bool) {
        self.stream_responses = stream;
    }

    pub fn set_show_metrics(&mut self, show: bool) {
        self.show_metrics = show;
    }

    pub fn notify(&mut self, message: impl ToString) {
        let message = message.to_string();
        log::error!("{}", message);
        self.notifications.push(message);
    }

    pub fn update(&mut self, action: ChatAction) -> Task<ChatAction> {
        match action {
            ChatAction::InputChanged(value) => self.on_input_changed(value),
            ChatAction::SendMessage => self.on_send_message(),
            ChatAction::Dispatch(event) => self.on_dispatch_event(event),
            ChatAction::ModelSelected(model_name) => self.on_model_selected(model_name),
            ChatAction::ModelsLoaded(endpoint, listing) => {
                self.on_models_loaded(endpoint, listing)
            }
            ChatAction::RefreshModels => self.refresh_models(),
            ChatAction::StreamToggled(stream) => {
                self.stream_responses = stream;
                Task::none()
            }
            ChatAction::MetricsToggled(show) => {
                self.show_metrics = show;
                Task::none()
            }
            ChatAction::ClearChat => self.on_clear_chat(),
            ChatAction::DismissNotification(index) => self.on_dismiss_notification(index),
            ChatAction::UrlClicked(url) => self.on_url_clicked(url),
        }
    }

    fn refresh_models(&mut self) -> Task<ChatAction> {
        match self.client.clone() {
            Some(client) => {
                self.loading_models = true;
                let endpoint = client.endpoint().clone();
                Task::perform(load_models(client), move |listing| {
                    ChatAction::ModelsLoaded(endpoint.clone(), listing)
                })
            }
            None => Task::none(),
        }
    }

    fn on_input_changed(&mut self, value: String) -> Task<ChatAction> {
        self.input_value = value;
        Task::none()
    }

    fn on_send_message(&mut self) -> Task<ChatAction> {
        if self.awaiting_response || self.input_value.trim().is_empty() {
            return Task::none();
        }
        let Some(model) = self.selected_model.clone() else {
            log::warn!("Ignoring prompt: no model selected");
            return Task::none();
        };
        let Some(client) = self.client.clone() else {
            self.notify("No model server is configured.");
            return Task::none();
        };

        let prompt = std::mem::take(&mut self.input_value);
        if let Err(err) = self.push_turn(Role::User, &prompt) {
            log::error!("Refusing prompt: {}", err);
            self.input_value = prompt;
            return Task::none();
        }
        self.awaiting_response = true;
        self.live_reply = None;
        self.pending = Some(PendingQuery {
            model: model.clone(),
            started: Instant::now(),
        });

        let request = GenerateRequest::new(model, prompt, self.stream_responses);
        Task::run(complete_message(client, request), ChatAction::Dispatch)
    }

    fn on_dispatch_event(&mut self, event: StreamEvent) -> Task<ChatAction> {
        match event {
            StreamEvent::Partial(text) => {
                let unchanged = self
                    .live_reply
                    .as_ref()
                    .is_some_and(|live| live.content == text);
                if self.awaiting_response && !unchanged {
                    self.live_reply = Some(ChatMessage::new(Role::Assistant, text));
                }
                Task::none()
            }
            StreamEvent::Finished(reply) => self.on_reply_finished(reply),
        }
    }

    fn on_reply_finished(&mut self, reply: Reply) -> Task<ChatAction> {
        log::info!("Reply finished: {} chars", reply.text().chars().count());
        self.live_reply = None;
        self.awaiting_response = false;
        let pending = self.pending.take();

        match (reply.error(), pending) {
            (Some(error), _) => self.notify(error),
            (None, Some(pending)) => {
                let stats = reply
                    .stats()
                    .cloned()
                    .unwrap_or_else(|| ReplyStats::measured(pending.started.elapsed()));
                self.metrics.record(pending.model, stats);
            }
            (None, None) => {}
        }

        if let Err(err) = self.push_turn(Role::Assistant, reply.text()) {
            log::error!("Dropping reply: {}", err);
        }
        Task::none()
    }

    fn push_turn(&mut self, role: Role, text: &str) -> anyhow::Result<()> {
        match role {
            Role::User => self.transcript.push_user(text)?,
            Role::Assistant => self.transcript.push_assistant(text)?,
        }
        if let Some(turn) = self.transcript.turns().last() {
            self.messages.push(turn.into());
        }
        Ok(())
    }

    fn on_model_selected(&mut self, model_name: String) -> Task<ChatAction> {
        self.selected_model = Some(model_name);
        Task::none()
    }

    fn on_models_loaded(&mut self, endpoint: Url, listing: ModelListing) -> Task<ChatAction> {
        let current = self.client.as_ref().map(OllamaClient::endpoint);
        if current != Some(&endpoint) {
            log::info!("Ignoring model listing from previous endpoint {}", endpoint);
            return Task::none();
        }
        self.loading_models = false;
        if let Some(error) = &listing.error {
            self.notify(error);
        }
        self.available_models = listing.models;

        let still_available = self
            .selected_model
            .as_ref()
            .is_some_and(|m| self.available_models.contains(m));
        if !still_available {
            self.selected_model = self.available_models.first().cloned();
        }
        Task::none()
    }

    fn on_clear_chat(&mut self) -> Task<ChatAction> {
        if self.awaiting_response {
            return Task::none();
        }
        log::info!("Clearing {} turns", self.transcript.len());
        self.transcript.clear();
        self.messages.clear();
        self.metrics.clear();
        Task::none()
    }

    fn on_dismiss_notification(&mut self, index: usize) -> Task<ChatAction> {
        if index < self.notifications.len() {
            self.notifications.remove(index);
        }
        Task::none()
    }

    fn on_url_clicked(&mut self, url: String) -> Task<ChatAction> {
        log::info!("URL clicked: {}", url);
        if let Err(err) = open::that(&url) {
            self.notify(format!("Could not open {}: {}", url, err));
        }
        Task::none()
    }

    pub fn view(&self, theme: &Theme) -> Element<'_, ChatAction> {
        let mut main = column![
            text("🤖 Local LLM Chat").size(28),
            text("Chat with local open-source models using Ollama").size(16),
        ]
        .spacing(10);

        if !self.notifications.is_empty() {
            main = main.push(self.build_notifications());
        }
        main = main.push(self.build_message_list(theme));
        if self.show_metrics && !self.transcript.is_empty() {
            main = main.push(metrics::view(&self.metrics));
        }
        main = main.push(self.build_input_area());

        let chat_window = row![
            self.build_sidebar().width(Length::FillPortion(1)),
            main.width(Length::FillPortion(3)),
        ]
        .spacing(20)
        .padding(10);

        container(chat_window)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn build_sidebar(&self) -> iced::widget::Column<'_, ChatAction> {
        let idle = !self.awaiting_response;
        column![
            text("Settings").size(20),
            text("Select LLM Model"),
            row![
                pick_list(
                    self.available_models.clone(),
                    self.selected_model.as_ref(),
                    ChatAction::ModelSelected
                )
                .placeholder("No models")
                .width(Length::Fill),
                button("Refresh").on_press_maybe(
                    (!self.loading_models).then_some(ChatAction::RefreshModels)
                ),
            ]
            .spacing(10)
            .align_y(Alignment::Center),
            toggler(self.stream_responses)
                .label("Stream response")
                .on_toggle(ChatAction::StreamToggled),
            toggler(self.show_metrics)
                .label("Show performance metrics")
                .on_toggle(ChatAction::MetricsToggled),
            button("Clear chat history").on_press_maybe(
                (idle && !self.transcript.is_empty()).then_some(ChatAction::ClearChat)
            ),
            text("About").size(18),
            text(ABOUT).size(14),
            text("Models").size(18),
            column(MODEL_NOTES.iter().map(|(name, note)| {
                text(format!("• {}: {}", name, note)).size(14).into()
            }))
            .spacing(4),
        ]
        .spacing(12)
    }

    fn build_notifications(&self) -> Element<'_, ChatAction> {
        column(
            self.notifications
                .iter()
                .enumerate()
                .map(|(index, message)| {
                    container(
                        row![
                            text(message).style(text::danger).width(Length::Fill),
                            button("Dismiss").on_press(ChatAction::DismissNotification(index)),
                        ]
                        .spacing(10)
                        .align_y(Alignment::Center),
                    )
                    .padding(8)
                    .style(container::rounded_box)
                    .into()
                }),
        )
        .spacing(6)
        .into()
    }

    fn build_message_list(&self, theme: &Theme) -> Element<'_, ChatAction> {
        let mut rows: Vec<Element<ChatAction>> = self
            .messages
            .iter()
            .map(|msg| Self::build_message_row(msg, theme))
            .collect();

        if let Some(live) = &self.live_reply {
            rows.push(Self::build_message_row(live, theme));
        } else if self.awaiting_response && !self.stream_responses {
            rows.push(
                row![Spinner::new(), text("Thinking...")]
                    .spacing(10)
                    .align_y(Alignment::Center)
                    .into(),
            );
        }

        if rows.is_empty() {
            rows.push(
                column![text(WELCOME), text(QUICK_START).size(14)]
                    .spacing(10)
                    .into(),
            );
        }

        scrollable(
            container(column(rows).spacing(10).padding(10))
                .width(Length::Fill)
                .padding(10),
        )
        .height(Length::Fill)
        .into()
    }

    fn build_message_row<'a>(msg: &'a ChatMessage, theme: &Theme) -> Element<'a, ChatAction> {
        let sender = match msg.role {
            Role::User => "You: ",
            Role::Assistant => "Assistant: ",
        };

        row![
            text(sender),
            markdown(
                &msg.markdown_items,
                markdown::Settings::with_style(markdown::Style::from_palette(theme.palette())),
            )
            .map(|url| ChatAction::UrlClicked(url.to_string())),
        ]
        .into()
    }

    fn build_input_area(&self) -> Element<'_, ChatAction> {
        let ready = !self.awaiting_response && self.selected_model.is_some();
        row![
            text_input("What would you like to ask?", &self.input_value)
                .on_input_maybe(if self.awaiting_response {
                    None
                } else {
                    Some(ChatAction::InputChanged)
                })
                .on_submit_maybe(ready.then_some(ChatAction::SendMessage))
                .width(Length::FillPortion(8)),
            button("Send")
                .on_press_maybe(ready.then_some(ChatAction::SendMessage))
                .width(Length::FillPortion(1)),
        ]
        .spacing(10)
        .align_y(Alignment::Center)
        .into()
    }
}
