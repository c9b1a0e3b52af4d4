use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use common::{Error, Result, TextGenerator};

const SYSTEM_PROMPT: &str =
    "You produce trade plans as strict JSON. Never add fields, never add commentary.";

/// Text generation over an OpenAI-compatible chat-completions endpoint.
pub struct HttpTextGenerator {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    http: Client,
}

impl HttpTextGenerator {
    /// `endpoint` is the API base, e.g. `https://api.openai.com/v1`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            http,
        })
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    content: Option<String>,
}

/// Map a non-success status onto the shared error kinds the retry logic understands.
fn status_error(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(format!("HTTP {status}: {body}")),
        StatusCode::NOT_FOUND => Error::NotFound(format!("HTTP {status}: {body}")),
        s if s.is_server_error() => Error::Http(format!("HTTP {status}: {body}")),
        _ => Error::Config(format!("text generation rejected, HTTP {status}: {body}")),
    }
}

/// First choice's content, or a generation error when there is none.
fn first_content(body: &str) -> Result<String> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| Error::Generation(format!("bad response: {e}")))?;
    resp.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::Generation("empty completion".into()))
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate(&self, prompt: &str, timeout: Duration) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": 0.2,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
        });

        let mut req = self.http.post(self.url()).timeout(timeout).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!(model = %self.model, prompt_len = prompt.len(), "Requesting completion");
        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(timeout)
            } else {
                Error::Http(e.to_string())
            }
        })?;

        let status = resp.status();
        let text = resp.text().await.map_err(|e| Error::Http(e.to_string()))?;
        if !status.is_success() {
            return Err(status_error(status, &text));
        }
        first_content(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_is_normalized() {
        let gen = HttpTextGenerator::new("http://localhost:8080/v1/", None, "m").unwrap();
        assert_eq!(gen.url(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn content_is_taken_from_first_choice() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"{\"a\":1}"}}]}"#;
        assert_eq!(first_content(body).unwrap(), "{\"a\":1}");
    }

    #[test]
    fn empty_completion_is_a_generation_error() {
        let body = r#"{"choices":[]}"#;
        assert!(matches!(first_content(body), Err(Error::Generation(_))));
        let blank = r#"{"choices":[{"message":{"content":"  "}}]}"#;
        assert!(matches!(first_content(blank), Err(Error::Generation(_))));
    }

    #[test]
    fn throttling_is_retryable_and_auth_is_not() {
        assert!(status_error(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(status_error(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert!(!status_error(StatusCode::UNAUTHORIZED, "").is_retryable());
    }
}
