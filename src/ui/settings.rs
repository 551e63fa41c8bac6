use iced::widget::{button, column, container, pick_list, row, text, text_input, toggler};
use iced::{Alignment, Element, Length, Theme};

use crate::api::OllamaClient;
use crate::config::Config;

#[derive(Debug, Clone, Default)]
pub struct State {
    // Required to be public for dynamically changing the theme
    pub config: Config,
    endpoint_input: String,
    endpoint_error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Action {
    ChangeTheme(Theme),
    EndpointChanged(String),
    ApplyEndpoint,
    StreamDefaultToggled(bool),
    MetricsDefaultToggled(bool),
}

/// Changes the chat page has to pick up.
#[derive(Debug, Clone)]
pub enum Event {
    EndpointChanged(OllamaClient),
    StreamDefault(bool),
    MetricsDefault(bool),
}

impl State {
    pub fn new(config: Config) -> Self {
        Self {
            endpoint_input: config.endpoint.clone(),
            config,
            endpoint_error: None,
        }
    }

    pub fn update(&mut self, action: Action) -> Option<Event> {
        match action {
            Action::ChangeTheme(theme) => {
                self.config.theme = theme;
                self.config.update_settings();
                None
            }
            Action::EndpointChanged(value) => {
                self.endpoint_input = value;
                self.endpoint_error = None;
                None
            }
            Action::ApplyEndpoint => self.apply_endpoint(),
            Action::StreamDefaultToggled(stream) => {
                self.config.stream_responses = stream;
                self.config.update_settings();
                Some(Event::StreamDefault(stream))
            }
            Action::MetricsDefaultToggled(show) => {
                self.config.show_metrics = show;
                self.config.update_settings();
                Some(Event::MetricsDefault(show))
            }
        }
    }

    fn apply_endpoint(&mut self) -> Option<Event> {
        let endpoint = self.endpoint_input.trim().to_string();
        match OllamaClient::new(&endpoint) {
            Ok(client) => {
                log::info!("Switching endpoint to {}", client.endpoint());
                self.config.endpoint = endpoint;
                self.endpoint_error = None;
                self.config.update_settings();
                Some(Event::EndpointChanged(client))
            }
            Err(err) => {
                log::warn!("Rejected endpoint {:?}: {}", endpoint, err);
                self.endpoint_error = Some(err.to_string());
                None
            }
        }
    }

    pub fn view(&self) -> Element<'_, Action> {
        let theme_selector = row![
            text("Theme").width(Length::Fixed(160.0)),
            pick_list(Theme::ALL, Some(&self.config.theme), Action::ChangeTheme),
        ]
        .spacing(10)
        .align_y(Alignment::Center);

        let endpoint_changed = self.endpoint_input.trim() != self.config.endpoint;
        let mut endpoint = column![row![
            text("Ollama endpoint").width(Length::Fixed(160.0)),
            text_input(crate::api::DEFAULT_ENDPOINT, &self.endpoint_input)
                .on_input(Action::EndpointChanged)
                .on_submit(Action::ApplyEndpoint),
            button("Apply").on_press_maybe(endpoint_changed.then_some(Action::ApplyEndpoint)),
        ]
        .spacing(10)
        .align_y(Alignment::Center)]
        .spacing(4);
        if let Some(error) = &self.endpoint_error {
            endpoint = endpoint.push(text(error).style(text::danger));
        }

        let defaults = column![
            toggler(self.config.stream_responses)
                .label("Stream responses by default")
                .on_toggle(Action::StreamDefaultToggled),
            toggler(self.config.show_metrics)
                .label("Show performance metrics by default")
                .on_toggle(Action::MetricsDefaultToggled),
        ]
        .spacing(10);

        container(
            column![text("Settings").size(24), theme_selector, endpoint, defaults]
                .spacing(20)
                .max_width(640),
        )
        .width(Length::Fill)
        .height(Length::Fill)
        .center_x(Length::Fill)
        .into()
    }
}
