use futures::stream::BoxStream;

use crate::{
    api::{ModelListing, OllamaClient, StreamEvent},
    models::GenerateRequest,
};

pub async fn load_models(client: OllamaClient) -> ModelListing {
    log::info!("Loading models from {}", client.endpoint());
    client.available_models().await
}

pub fn complete_message(
    client: OllamaClient,
    request: GenerateRequest,
) -> BoxStream<'static, StreamEvent> {
    log::info!(
        "Prompt of {} chars for {} (stream: {})",
        request.prompt.chars().count(),
        request.model,
        request.stream
    );
    client.dispatch(request)
}
