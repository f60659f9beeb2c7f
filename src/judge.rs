//! Chat-completion client for the judge model.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::{Duration, SystemTime};
use tokio::time::sleep;

use crate::config::ModelConfig;
use crate::error::{CrasError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<Usage>,
}

/// Sampling parameters sent with every request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait Judge: Send + Sync {
    /// Model name used for pricing.
    fn model(&self) -> &str;

    /// Send one user message and return the first choice.
    async fn complete(&self, prompt: &str, params: GenParams) -> Result<Completion>;
}

/// OpenAI-compatible `/chat/completions` endpoint.
#[derive(Debug, Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl ChatClient {
    pub fn new(cfg: &ModelConfig, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if !cfg.api_key.is_empty() {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))
                .map_err(|e| CrasError::Config(format!("api key is not a valid header: {e}")))?;
            headers.insert(AUTHORIZATION, bearer);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CrasError::Config(format!("cannot build http client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/chat/completions", cfg.model_url.trim_end_matches('/')),
            model: cfg.model_name.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Debug, Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl Judge for ChatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str, params: GenParams) -> Result<Completion> {
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| CrasError::Api(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let msg = resp.text().await.unwrap_or_default();
            return Err(CrasError::Api(format!("{status}: {msg}")));
        }

        let raw: Value = resp.json().await.map_err(|e| CrasError::Api(e.to_string()))?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| CrasError::Api(format!("unexpected response structure: {e}; body: {raw}")))?;

        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CrasError::Api(format!("response has no message content: {raw}")))?;

        Ok(Completion {
            text,
            usage: parsed.usage,
        })
    }
}

/// Retry `judge.complete` on failure with exponential back-off plus jitter.
/// Returns the last error once `max_attempts` calls have failed.
pub async fn complete_with_retry(
    judge: &dyn Judge,
    prompt: &str,
    params: GenParams,
    max_attempts: u8,
    base_delay: Duration,
) -> Result<Completion> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1u8;
    loop {
        match judge.complete(prompt, params).await {
            Ok(c) => return Ok(c),
            Err(e) if attempt < max_attempts => {
                let jitter = SystemTime::now()
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| u64::from(d.subsec_millis()) % 300)
                    .unwrap_or(0);
                let wait = base_delay * 2u32.pow(u32::from(attempt)) + Duration::from_millis(jitter);
                log::warn!("judge attempt {attempt}/{max_attempts} failed: {e}; retrying in {wait:?}");
                sleep(wait).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Judge for Flaky {
        fn model(&self) -> &str {
            "flaky"
        }

        async fn complete(&self, _prompt: &str, _params: GenParams) -> Result<Completion> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                return Err(CrasError::Api(format!("boom {n}")));
            }
            Ok(Completion {
                text: "ok".into(),
                usage: None,
            })
        }
    }

    const PARAMS: GenParams = GenParams {
        temperature: 0.0,
        max_tokens: 16,
    };

    #[tokio::test]
    async fn retry_recovers_from_transient_failures() {
        let j = Flaky {
            failures: 2,
            calls: AtomicUsize::new(0),
        };
        let c = complete_with_retry(&j, "p", PARAMS, 3, Duration::ZERO).await.unwrap();
        assert_eq!(c.text, "ok");
        assert_eq!(j.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_max_attempts() {
        let j = Flaky {
            failures: 10,
            calls: AtomicUsize::new(0),
        };
        let err = complete_with_retry(&j, "p", PARAMS, 2, Duration::ZERO).await.unwrap_err();
        assert!(matches!(err, CrasError::Api(ref m) if m == "boom 1"));
        assert_eq!(j.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn url_is_joined_without_double_slash() {
        let cfg = ModelConfig {
            model_name: "m".into(),
            model_url: "http://localhost:9/v1/".into(),
            api_key: "k".into(),
            prompt_price_per_1k: None,
            completion_price_per_1k: None,
        };
        let c = ChatClient::new(&cfg, Duration::from_secs(1)).unwrap();
        assert_eq!(c.url, "http://localhost:9/v1/chat/completions");
        assert_eq!(c.model(), "m");
    }
}
