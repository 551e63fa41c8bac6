//! Client for the local model server.
//!
//! Only two endpoints are used: `GET /api/tags` to list installed models
//! and `POST /api/generate` to answer a prompt. Every call is a single
//! attempt; failures come back as values, never as panics.

use futures::{future, stream, stream::BoxStream, StreamExt};
use url::Url;

use crate::{
    metrics::ReplyStats,
    models::{GenerateRequest, GenerateResponse, TagsResponse},
};

use super::{
    fallback_models,
    stream::{accumulate, Reply, StreamEvent},
    QueryError,
};

pub const DEFAULT_ENDPOINT: &str = "http://localhost:11434";

/// Result of asking the server for its models.
///
/// On failure `models` holds the fallback list and `error` says why.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelListing {
    pub models: Vec<String>,
    pub error: Option<QueryError>,
}

#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl OllamaClient {
    pub fn new(endpoint: &str) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().build()?;
        Self::with_http(endpoint, http)
    }

    pub fn with_http(endpoint: &str, http: reqwest::Client) -> anyhow::Result<Self> {
        Ok(Self {
            http,
            endpoint: parse_endpoint(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url, QueryError> {
        self.endpoint
            .join(path)
            .map_err(|e| QueryError::Connection(e.to_string()))
    }

    pub async fn list_models(&self) -> Result<Vec<String>, QueryError> {
        let url = self.url("api/tags")?;
        log::info!("OllamaClient: Fetching installed models from {}", url);
        let response = self.http.get(url).send().await?;

        let status = response.status();
        if !status.is_success() {
            log::error!("OllamaClient: Listing models failed with status: {}", status);
            return Err(QueryError::ListingStatus(status.as_u16()));
        }
        let body = response.bytes().await?;
        let tags: TagsResponse = serde_json::from_slice(&body)?;
        let models = tags.names();
        log::info!("OllamaClient: Available models: {:?}", models);
        Ok(models)
    }

    /// Installed models, or the fallback list when the server can't be asked.
    pub async fn available_models(&self) -> ModelListing {
        match self.list_models().await {
            Ok(models) => ModelListing {
                models,
                error: None,
            },
            Err(error) => {
                log::warn!("OllamaClient: Using default models: {}", error);
                ModelListing {
                    models: fallback_models(),
                    error: Some(error),
                }
            }
        }
    }

    async fn send_generate(&self, body: &GenerateRequest) -> Result<reqwest::Response, QueryError> {
        let url = self.url("api/generate")?;
        log::info!(
            "OllamaClient: Sending prompt to {} (stream: {})",
            body.model,
            body.stream
        );
        let response = self.http.post(url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            log::error!("OllamaClient: Generate failed with status: {}", status);
            return Err(QueryError::Status(status.as_u16()));
        }
        Ok(response)
    }

    async fn request_generate(
        &self,
        request: &GenerateRequest,
    ) -> Result<GenerateResponse, QueryError> {
        let body = GenerateRequest {
            stream: false,
            ..request.clone()
        };
        let response = self.send_generate(&body).await?;
        let bytes = response.bytes().await?;
        let reply: GenerateResponse = serde_json::from_slice(&bytes)?;
        if let Some(message) = reply.error {
            return Err(QueryError::Server(message));
        }
        Ok(reply)
    }

    /// Asks for the whole reply in one response body.
    pub async fn generate(&self, request: &GenerateRequest) -> Reply {
        match self.request_generate(request).await {
            Ok(reply) => Reply::Complete {
                stats: ReplyStats::from_response(&reply),
                text: reply.response,
            },
            Err(error) => {
                log::error!("OllamaClient: {}", error);
                Reply::failed(error)
            }
        }
    }

    /// Asks for an incremental reply; see [`accumulate`] for how the body is
    /// folded.
    pub fn generate_stream(&self, request: GenerateRequest) -> BoxStream<'static, StreamEvent> {
        let client = self.clone();
        let body = GenerateRequest {
            stream: true,
            ..request
        };
        stream::once(async move {
            match client.send_generate(&body).await {
                Ok(response) => accumulate(response.bytes_stream()).boxed(),
                Err(error) => {
                    log::error!("OllamaClient: {}", error);
                    stream::once(future::ready(StreamEvent::Finished(Reply::failed(error))))
                        .boxed()
                }
            }
        })
        .flatten()
        .boxed()
    }

    /// Runs one prompt in whichever mode the request asks for. Non-streaming
    /// requests produce a single `Finished` event.
    pub fn dispatch(&self, request: GenerateRequest) -> BoxStream<'static, StreamEvent> {
        if request.stream {
            return self.generate_stream(request);
        }
        let client = self.clone();
        stream::once(async move { StreamEvent::Finished(client.generate(&request).await) }).boxed()
    }
}

/// Accepts `http(s)://host[:port][/prefix]` and normalises it so API paths
/// can be joined onto it.
pub fn parse_endpoint(endpoint: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(endpoint.trim())?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("unsupported scheme '{}', expected http or https", url.scheme());
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
