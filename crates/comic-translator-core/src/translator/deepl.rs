use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::openai::retry_after_secs;
use super::traits::{passthrough, Translator, TranslatorInfo};
use crate::config::Lang;
use crate::error::{Error, Result};

/// Free-plan endpoint; paid keys use `https://api.deepl.com/v2`.
pub const DEEPL_FREE_API_BASE: &str = "https://api-free.deepl.com/v2";

/// DeepL REST API translator
pub struct DeepLTranslator {
    client: Client,
    /// Base URL for the API (e.g., "https://api-free.deepl.com/v2")
    pub api_base: String,
    api_key: String,
    pub retry_count: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
struct DeepLResponse {
    translations: Vec<DeepLTranslation>,
}

#[derive(Debug, Deserialize)]
struct DeepLTranslation {
    text: String,
}

impl DeepLTranslator {
    /// Create a DeepL translator. A missing or blank key is rejected up front.
    pub fn new(
        api_base: String,
        api_key: Option<String>,
        retry_count: u32,
        retry_delay_ms: u64,
    ) -> Result<Self> {
        let api_key = api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or(Error::TranslationMissingApiKey)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::TranslationRequest(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base,
            api_key,
            retry_count: retry_count.max(1),
            retry_delay_ms,
        })
    }

    fn form(text: &str, source: &Lang, target: &Lang) -> Vec<(&'static str, String)> {
        let mut form = vec![("text", text.to_string())];
        // Omitting source_lang lets DeepL detect it.
        if !source.is_auto() {
            form.push(("source_lang", source.as_str().to_uppercase()));
        }
        form.push(("target_lang", target.as_str().to_uppercase()));
        form
    }

    async fn request_with_retry(&self, text: &str, source: &Lang, target: &Lang) -> Result<String> {
        let url = format!("{}/translate", self.api_base.trim_end_matches('/'));
        let form = Self::form(text, source, target);
        let mut last_error = None;

        for attempt in 0..self.retry_count {
            debug!("DeepL request attempt {}/{}", attempt + 1, self.retry_count);

            let response = self
                .client
                .post(&url)
                .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
                .form(&form)
                .send()
                .await;

            match response {
                Ok(response) if response.status().is_success() => {
                    let parsed = response
                        .json::<DeepLResponse>()
                        .await
                        .map_err(|e| Error::TranslationInvalidResponse(e.to_string()))?;
                    return parsed
                        .translations
                        .into_iter()
                        .next()
                        .map(|t| t.text.trim().to_string())
                        .ok_or_else(|| {
                            Error::TranslationInvalidResponse("No translations in response".to_string())
                        });
                }
                Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after = retry_after_secs(&response);
                    warn!("DeepL rate limited, retry after {:?}s", retry_after);
                    last_error = Some(Error::TranslationRateLimited { retry_after });
                    let wait_time = retry_after.unwrap_or(5) * 1000;
                    tokio::time::sleep(Duration::from_millis(wait_time)).await;
                    continue;
                }
                Ok(response) if response.status().is_client_error() => {
                    // Bad key, quota exhausted, unsupported language: retrying won't help.
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(Error::TranslationRequest(format!(
                        "DeepL HTTP {status}: {}",
                        crate::util::truncate_for_log(&body, 200)
                    )));
                }
                Ok(response) => {
                    let status = response.status();
                    warn!("DeepL API error: {}", status);
                    last_error = Some(Error::TranslationRequest(format!("DeepL HTTP {status}")));
                }
                Err(e) => {
                    warn!("DeepL request failed: {}", e);
                    last_error = Some(if e.is_timeout() {
                        Error::TranslationTimeout
                    } else {
                        Error::TranslationRequest(e.to_string())
                    });
                }
            }

            if attempt + 1 < self.retry_count {
                tokio::time::sleep(Duration::from_millis(self.retry_delay_ms)).await;
            }
        }

        error!("DeepL translation failed after {} attempts", self.retry_count);
        Err(last_error.unwrap_or(Error::TranslationMaxRetriesExceeded))
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    fn info(&self) -> TranslatorInfo {
        TranslatorInfo {
            name: "DeepL",
            requires_api_key: true,
            supports_auto_detect: true,
        }
    }

    async fn translate(&self, text: &str, source: &Lang, target: &Lang) -> Result<String> {
        if passthrough(text, source, target) {
            return Ok(text.to_string());
        }

        self.request_with_retry(text, source, target).await
    }
}
