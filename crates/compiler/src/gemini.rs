//! Gemini `generateContent` client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::GeminiConfig;
use crate::error::{ForgeError, ForgeResult};
use crate::generator::TextService;

const MAX_ERROR_BODY: usize = 320;

/// HTTP client for the Gemini text-generation API
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    url: Url,
    model: String,
    temperature: Option<f32>,
}

impl std::fmt::Debug for GeminiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The URL carries the API key
        f.debug_struct("GeminiClient")
            .field("model", &self.model)
            .finish()
    }
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> ForgeResult<Self> {
        let api_key = config.api_key.as_deref().ok_or_else(|| {
            ForgeError::InvalidConfig("gemini backend requires api_key (or GEMINI_API_KEY)".into())
        })?;
        let url = resolve_endpoint(&config.endpoint, &config.model, api_key)?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            url,
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn payload(&self, prompt: &str) -> Value {
        let mut payload = json!({
            "contents": [
                {
                    "role": "user",
                    "parts": [{ "text": prompt }]
                }
            ]
        });
        if let Some(temperature) = self.temperature {
            payload["generationConfig"] = json!({ "temperature": temperature });
        }
        payload
    }
}

#[async_trait]
impl TextService for GeminiClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> ForgeResult<String> {
        debug!("POST generateContent model={}", self.model);

        let response = self
            .client
            .post(self.url.clone())
            .json(&self.payload(prompt))
            .send()
            .await
            .map_err(|e| ForgeError::Generation(format!("gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ForgeError::TextService {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ForgeError::Generation(format!("invalid gemini response: {}", e)))?;

        Ok(extract_text(&body))
    }
}

/// Concatenate the text parts of the first candidate. Parts may split a
/// JSON string value, so no separator is inserted.
fn extract_text(body: &Value) -> String {
    body["candidates"]
        .as_array()
        .and_then(|candidates| candidates.first())
        .and_then(|candidate| candidate["content"]["parts"].as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn resolve_endpoint(endpoint: &str, model: &str, api_key: &str) -> ForgeResult<Url> {
    let mut url = if endpoint.contains(":generateContent") {
        Url::parse(endpoint)
            .map_err(|e| ForgeError::InvalidConfig(format!("invalid endpoint {}: {}", endpoint, e)))?
    } else {
        let generated = format!(
            "{}/v1beta/models/{}:generateContent",
            endpoint.trim_end_matches('/'),
            model
        );
        Url::parse(&generated).map_err(|e| {
            ForgeError::InvalidConfig(format!("invalid endpoint {}: {}", generated, e))
        })?
    };

    if !url.query_pairs().any(|(k, _)| k == "key") {
        url.query_pairs_mut().append_pair("key", api_key);
    }
    Ok(url)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> GeminiConfig {
        GeminiConfig {
            endpoint: endpoint.to_string(),
            model: "gemini-2.0-flash".to_string(),
            api_key: Some("test-key".to_string()),
            timeout_secs: 5,
            temperature: None,
        }
    }

    #[test]
    fn test_resolve_endpoint() {
        let url = resolve_endpoint("https://example.com/", "m1", "k").unwrap();
        assert_eq!(
            url.as_str(),
            "https://example.com/v1beta/models/m1:generateContent?key=k"
        );

        let full = resolve_endpoint("https://example.com/v1/models/x:generateContent?key=z", "m1", "k")
            .unwrap();
        assert_eq!(full.query_pairs().filter(|(k, _)| k == "key").count(), 1);
    }

    #[test]
    fn test_missing_api_key_is_config_error() {
        let mut cfg = config("https://example.com");
        cfg.api_key = None;
        assert!(matches!(GeminiClient::new(&cfg), Err(ForgeError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_complete_joins_candidate_parts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{
                    "content": { "parts": [{ "text": "{\"scenarios\":" }, { "text": "[]}" }] },
                    "finishReason": "STOP"
                }]
            })))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(&server.uri())).unwrap();
        let text = client.complete("hello").await.unwrap();
        assert_eq!(text, "{\"scenarios\":[]}");
    }

    #[test]
    fn test_extract_text_keeps_split_string_values_intact() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "{\"scenarios\": [{\"name\": \"Valid lo" },
                    { "text": "gin\", \"steps\": []}]}" }
                ] }
            }]
        });

        let text = extract_text(&body);
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["scenarios"][0]["name"], "Valid login");
        assert_eq!(crate::generator::parse_scenarios(&text).len(), 1);
    }

    #[test]
    fn test_extract_text_without_candidates() {
        assert_eq!(extract_text(&json!({ "promptFeedback": {} })), "");
    }

    #[tokio::test]
    async fn test_http_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let client = GeminiClient::new(&config(&server.uri())).unwrap();
        match client.complete("hello").await {
            Err(ForgeError::TextService { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "quota exceeded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
