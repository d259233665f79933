//! Cohere chat API client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use coursesmith_shared::{AppConfig, CoursesmithError, Result, TransportKind, api_key};

use crate::client::{GenerationClient, StageContext};
use crate::prompts;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Request timeout per stage.
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub name: Duration,
    pub outline: Duration,
    pub topic: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            name: Duration::from_secs(15),
            outline: Duration::from_secs(60),
            topic: Duration::from_secs(180),
        }
    }
}

impl StageTimeouts {
    fn for_context(&self, context: &StageContext) -> Duration {
        match context {
            StageContext::Name { .. } => self.name,
            StageContext::Outline { .. } => self.outline,
            StageContext::Topic(_) => self.topic,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    temperature: f64,
}

/// The v1 chat response carries `text`; newer shapes nest it under `message`.
#[derive(Debug, Default, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    message: Option<ChatMessage>,
}

#[derive(Debug, Default, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Debug, Default, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<String>,
}

impl ChatResponse {
    fn into_text(self) -> Option<String> {
        let nested = || {
            self.message
                .as_ref()
                .and_then(|m| m.content.first())
                .and_then(|part| part.text.as_deref())
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
        };
        self.text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .or_else(nested)
    }
}

fn map_http_error(error: reqwest::Error) -> CoursesmithError {
    if error.is_timeout() {
        CoursesmithError::transport(TransportKind::Timeout, format!("request timeout: {error}"))
    } else if error.is_connect() {
        CoursesmithError::transport(
            TransportKind::ServiceError,
            format!("connection error: {error}"),
        )
    } else {
        CoursesmithError::transport(TransportKind::ServiceError, format!("HTTP error: {error}"))
    }
}

/// [`GenerationClient`] backed by Cohere's `/chat` endpoint.
pub struct CohereClient {
    client: Client,
    api_key: String,
    model: String,
    endpoint: Url,
    timeouts: StageTimeouts,
}

impl CohereClient {
    pub fn new(
        api_key: String,
        model: String,
        base_url: &str,
        timeouts: StageTimeouts,
    ) -> Result<Self> {
        let endpoint = Url::parse(&format!("{}/chat", base_url.trim_end_matches('/')))
            .map_err(|e| {
                CoursesmithError::config(format!("invalid Cohere base_url '{base_url}': {e}"))
            })?;

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| CoursesmithError::config(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key,
            model,
            endpoint,
            timeouts,
        })
    }

    /// Build a client from `[cohere]`, reading the key from its env var.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cohere = &config.cohere;
        Self::new(
            api_key(config)?,
            cohere.model.clone(),
            &cohere.base_url,
            StageTimeouts {
                name: Duration::from_secs(cohere.name_timeout_secs),
                outline: Duration::from_secs(cohere.outline_timeout_secs),
                topic: Duration::from_secs(cohere.topic_timeout_secs),
            },
        )
    }
}

#[async_trait]
impl GenerationClient for CohereClient {
    async fn generate(&self, context: &StageContext) -> Result<String> {
        let prompt = prompts::render(context);
        let request = ChatRequest {
            model: &self.model,
            message: &prompt,
            temperature: prompts::temperature(context),
        };

        debug!(stage = %context.stage(), model = %self.model, "calling Cohere");
        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .timeout(self.timeouts.for_context(context))
            .json(&request)
            .send()
            .await
            .map_err(map_http_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            let kind = if status.as_u16() == 429 {
                TransportKind::RateLimited
            } else {
                TransportKind::ServiceError
            };
            return Err(CoursesmithError::transport(
                kind,
                format!("Cohere returned {status}: {error_text}"),
            ));
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                map_http_error(e)
            } else {
                CoursesmithError::transport(
                    TransportKind::ServiceError,
                    format!("failed to decode Cohere response: {e}"),
                )
            }
        })?;

        body.into_text().ok_or_else(|| {
            CoursesmithError::transport(TransportKind::ServiceError, "empty response from Cohere")
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coursesmith_shared::TopicRef;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeouts: StageTimeouts) -> CohereClient {
        CohereClient::new(
            "test-key".into(),
            "command-a-03-2025".into(),
            &format!("{}/v1", server.uri()),
            timeouts,
        )
        .expect("build client")
    }

    fn name_context() -> StageContext {
        StageContext::Name {
            topic: "graph theory".into(),
        }
    }

    #[tokio::test]
    async fn returns_top_level_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "command-a-03-2025",
                "temperature": 0.7
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "  {\"suggestion\": \"Foundations of Graph Theory\"}  "
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, StageTimeouts::default());
        let text = client.generate(&name_context()).await.expect("generate");
        assert_eq!(text, "{\"suggestion\": \"Foundations of Graph Theory\"}");
    }

    #[tokio::test]
    async fn falls_back_to_nested_message_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": { "content": [ { "type": "text", "text": "{\"modules\": []}" } ] }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, StageTimeouts::default());
        let context = StageContext::Topic(TopicRef::new("Graphs", "Traversal", "BFS"));
        let text = client.generate(&context).await.expect("generate");
        assert_eq!(text, "{\"modules\": []}");
    }

    #[tokio::test]
    async fn rate_limit_maps_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(429).set_body_string("too many requests"))
            .mount(&server)
            .await;

        let client = client_for(&server, StageTimeouts::default());
        let err = client.generate(&name_context()).await.unwrap_err();
        assert!(matches!(
            err,
            CoursesmithError::Transport {
                kind: TransportKind::RateLimited,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn server_error_maps_to_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = client_for(&server, StageTimeouts::default());
        let err = client.generate(&name_context()).await.unwrap_err();
        assert!(matches!(
            err,
            CoursesmithError::Transport {
                kind: TransportKind::ServiceError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn empty_body_is_service_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "text": "   "
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, StageTimeouts::default());
        let err = client.generate(&name_context()).await.unwrap_err();
        assert!(err.to_string().contains("empty response"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({ "text": "{}" }))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let timeouts = StageTimeouts {
            name: Duration::from_millis(200),
            ..StageTimeouts::default()
        };
        let client = client_for(&server, timeouts);
        let err = client.generate(&name_context()).await.unwrap_err();
        assert!(matches!(
            err,
            CoursesmithError::Transport {
                kind: TransportKind::Timeout,
                ..
            }
        ));
    }

    #[test]
    fn invalid_base_url_is_config_error() {
        let err = CohereClient::new(
            "k".into(),
            "m".into(),
            "not a url",
            StageTimeouts::default(),
        )
        .err()
        .expect("invalid url");
        assert!(matches!(err, CoursesmithError::Config { .. }));
    }
}
