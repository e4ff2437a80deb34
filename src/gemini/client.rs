use std::time::Duration;

use reqwest::Client;
use tracing::{debug, warn};

use super::extract::extract_text;
use super::types::{Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, Part};
use crate::config::GeminiConfig;
use crate::provider::retry::with_retries;
use crate::provider::{
    ApiKey, LanguageModel, ProviderError, ResponseFormat, RetryPolicy, classify_api_error,
    ensure_success,
};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";
const INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
const PLANNING_TEMPERATURE: f32 = 0.2;
const ANSWER_TEMPERATURE: f32 = 0.4;

/// Gemini `generateContent` client. One instance per model: the workflow
/// holds a planning instance and an answering instance.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    api_key: ApiKey,
    model: String,
    base_url: String,
    timeout: Duration,
    retry: RetryPolicy,
}

impl GeminiClient {
    pub fn from_config(
        http: Client,
        config: &GeminiConfig,
        model: &str,
    ) -> Result<Self, ProviderError> {
        let api_key = ApiKey::parse(config.api_key.as_deref())
            .ok_or(ProviderError::ApiKeyNotSet("GEMINI_API_KEY"))?;
        Ok(Self {
            http,
            api_key,
            model: model.to_string(),
            base_url: API_BASE.to_string(),
            timeout: config.timeout,
            retry: RetryPolicy::new(config.max_retries, INITIAL_BACKOFF),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            api_key: ApiKey::for_tests(),
            model: crate::config::DEFAULT_GEMINI_MODEL.to_string(),
            base_url: base_url.to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::new(0, Duration::from_millis(1)),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn generate_content(
        &self,
        prompt: &str,
        format: ResponseFormat,
    ) -> Result<GenerateContentResponse, ProviderError> {
        let url = format!("{}/{}:generateContent", self.base_url, self.model);

        let generation_config = match format {
            ResponseFormat::Json => GenerationConfig {
                temperature: PLANNING_TEMPERATURE,
                response_mime_type: Some("application/json"),
            },
            ResponseFormat::Text => GenerationConfig {
                temperature: ANSWER_TEMPERATURE,
                response_mime_type: None,
            },
        };

        let request = GenerateContentRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
                role: Some("user".to_string()),
            }],
            generation_config: Some(generation_config),
        };

        debug_assert!(
            url.starts_with("https://") || cfg!(test),
            "API key must only be sent over HTTPS"
        );

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", self.api_key.expose())
            .header("User-Agent", crate::USER_AGENT)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await?;

        let body: GenerateContentResponse = ensure_success(response, "gemini").await?.json().await?;
        debug!(model = %self.model, "gemini generation complete");

        if let Some(err) = &body.error {
            let classified = classify_api_error(err.code, err.message.clone());
            warn!(error = %classified, "Gemini API error in 200 response");
            return Err(classified);
        }

        Ok(body)
    }
}

impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str, format: ResponseFormat) -> Result<String, ProviderError> {
        let response = with_retries(self.retry, "gemini", move || {
            self.generate_content(prompt, format)
        })
        .await?;

        extract_text(&response)
            .ok_or_else(|| ProviderError::InvalidResponse("Gemini returned an empty answer".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_requires_api_key() {
        let config = GeminiConfig {
            api_key: None,
            planning_model: "m".into(),
            answer_model: "m".into(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
        };
        let err = GeminiClient::from_config(Client::new(), &config, "m").unwrap_err();
        assert!(err.to_string().contains("GEMINI_API_KEY"), "got: {err}");
    }

    #[test]
    fn debug_output_never_contains_key() {
        let config = GeminiConfig {
            api_key: Some("super-secret".into()),
            planning_model: "m".into(),
            answer_model: "m".into(),
            timeout: Duration::from_secs(1),
            max_retries: 0,
        };
        let client = GeminiClient::from_config(Client::new(), &config, "m").unwrap();
        assert!(!format!("{:?}", client.api_key).contains("super-secret"));
        assert_eq!(client.model(), "m");
    }
}
