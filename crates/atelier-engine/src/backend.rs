use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use atelier_contracts::errors::RemoteCapabilityError;
use atelier_contracts::generation::GenerationPayload;
use atelier_contracts::text::truncate_text;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use tracing::warn;

use crate::config::TryOnConfig;
use crate::transport_error_text;

/// The remote image-generation capability.
///
/// Returns the raw response object; interpreting its shape is left to
/// the caller.
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate_content(
        &self,
        model: &str,
        payload: &GenerationPayload,
    ) -> Result<Value, RemoteCapabilityError>;
}

/// `models/{model}:generateContent` on the Gemini API.
pub struct GeminiBackend {
    api_base: String,
    api_key: String,
    http: HttpClient,
    request_timeout: Duration,
    transport_retries: usize,
    retry_backoff: Duration,
}

impl GeminiBackend {
    pub fn new(config: &TryOnConfig) -> Result<Self> {
        let Some(api_key) = config.api_key.clone() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let http = HttpClient::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            http,
            request_timeout: config.generation_timeout,
            transport_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn request_body(payload: &GenerationPayload) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": payload.parts_json(),
            }],
            "generationConfig": {
                "candidateCount": 1,
                "responseModalities": ["TEXT", "IMAGE"],
            },
        })
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        body: &Value,
    ) -> Result<HttpResponse, RemoteCapabilityError> {
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", self.api_key.as_str())])
                .timeout(self.request_timeout)
                .json(body)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(err) => {
                    let detail = transport_error_text(&err, self.request_timeout);
                    if !is_retryable_transport_error(&err) || attempt >= self.transport_retries {
                        return Err(RemoteCapabilityError::NetworkFailure(detail));
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.transport_retries,
                        error = %detail,
                        "Gemini transport retry after transient request failure"
                    );
                    thread::sleep(self.retry_backoff.mul_f64(attempt as f64));
                }
            }
        }
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate_content(
        &self,
        model: &str,
        payload: &GenerationPayload,
    ) -> Result<Value, RemoteCapabilityError> {
        let endpoint = self.endpoint_for_model(model);
        let body = Self::request_body(payload);
        let response = self.post_with_transport_retries(&endpoint, &body)?;
        response_json_or_error(response, self.request_timeout)
    }
}

fn response_json_or_error(
    response: HttpResponse,
    timeout: Duration,
) -> Result<Value, RemoteCapabilityError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| RemoteCapabilityError::NetworkFailure(transport_error_text(&err, timeout)))?;
    if !status.is_success() {
        return Err(RemoteCapabilityError::NetworkFailure(format!(
            "HTTP {}: {}",
            status.as_u16(),
            truncate_text(body.trim(), 512)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        RemoteCapabilityError::MalformedResponse(format!(
            "{err}; body starts with {:?}",
            truncate_text(body.trim(), 80)
        ))
    })
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
