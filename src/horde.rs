//! KoboldAI Horde job client.
//!
//! Thin HTTP layer over the Horde's async generation API: submit a job, poll
//! its status, fetch the finished text, cancel it. Every call transparently
//! retries on 429, sleeping out the server's `Retry-After` hint, so rate
//! limiting never surfaces to callers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::HordeError;

/// Interval between status calls while a job is active.
pub const POLL_INTERVAL: Duration = Duration::from_millis(1500);

/// Summary status of a submitted job.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCheck {
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub faulted: bool,
    #[serde(default = "default_true")]
    pub is_possible: bool,
    #[serde(default)]
    pub queue_position: u32,
    #[serde(default)]
    pub wait_time: u32,
    #[serde(default)]
    pub waiting: u32,
    #[serde(default)]
    pub processing: u32,
    #[serde(default)]
    pub finished: u32,
}

fn default_true() -> bool {
    true
}

/// Full status, available once the job is done.
#[derive(Debug, Clone, Deserialize)]
pub struct JobStatus {
    #[serde(flatten)]
    pub check: JobCheck,
    #[serde(default)]
    pub generations: Vec<Generation>,
}

/// One generated candidate.
#[derive(Debug, Clone, Deserialize)]
pub struct Generation {
    pub text: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub worker_name: String,
}

/// The remote job API as the orchestrator sees it.
///
/// `HordeClient` is the production implementation; tests drive the
/// orchestrator through a scripted mock.
#[async_trait]
pub trait JobApi: Send + Sync {
    /// Submit a prompt. Returns the opaque job id.
    async fn create_job(&self, prompt: &str) -> Result<String, HordeError>;

    /// Lightweight status probe.
    async fn check_job(&self, id: &str) -> Result<JobCheck, HordeError>;

    /// Full status including generated text. Meaningful once done.
    async fn get_job(&self, id: &str) -> Result<JobStatus, HordeError>;

    /// Best-effort cancel. Only guarantees local polling stops, not that
    /// remote compute halts.
    async fn cancel_job(&self, id: &str) -> Result<(), HordeError>;
}

/// Sampling parameters submitted with every job.
///
/// Defaults are the tuned chat settings the bot has always shipped with;
/// override individual fields through [`HordeClient::with_sampler`].
#[derive(Debug, Clone, Serialize)]
pub struct SamplerSettings {
    pub n: u32,
    pub max_context_length: u32,
    pub max_length: u32,
    pub rep_pen: f64,
    pub rep_pen_range: u32,
    pub rep_pen_slope: f64,
    pub sampler_order: Vec<u32>,
    pub temperature: f64,
    pub tfs: f64,
    pub top_a: f64,
    pub top_k: u32,
    pub top_p: f64,
    pub typical: f64,
    pub singleline: bool,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            n: 1,
            max_context_length: 1024,
            max_length: 80,
            rep_pen: 1.08,
            rep_pen_range: 1024,
            rep_pen_slope: 0.7,
            sampler_order: vec![6, 0, 1, 2, 3, 4, 5],
            temperature: 0.62,
            tfs: 1.0,
            top_a: 0.0,
            top_k: 0,
            top_p: 0.9,
            typical: 1.0,
            singleline: true,
        }
    }
}

#[derive(Debug, Serialize)]
struct JobCreateRequest<'a> {
    prompt: &'a str,
    params: &'a SamplerSettings,
    models: &'a [String],
    workers: &'a [String],
}

#[derive(Debug, Deserialize)]
struct JobCreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

/// HTTP client for the Horde job API.
pub struct HordeClient {
    client: Client,
    base_url: String,
    api_key: SecretString,
    sampler: SamplerSettings,
    models: Vec<String>,
}

impl HordeClient {
    /// Create a client against `base_url` (no trailing slash needed).
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Result<Self, HordeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            sampler: SamplerSettings::default(),
            models: Vec::new(),
        })
    }

    /// Restrict generation to the given models. Empty means any.
    pub fn with_models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Override the default sampling parameters.
    pub fn with_sampler(mut self, sampler: SamplerSettings) -> Self {
        self.sampler = sampler;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Send a request, transparently sleeping out 429 responses.
    ///
    /// The wait hint is read from `Retry-After` each round; there is no retry
    /// ceiling, so a misbehaving server can stall the call indefinitely.
    async fn send_retrying(
        &self,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response, HordeError> {
        loop {
            let response = build().send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return Ok(response);
            }
            let wait = retry_after_hint(response.headers()).unwrap_or(Duration::ZERO);
            tracing::warn!(wait_ms = wait.as_millis() as u64, "Horde rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
    }

    /// Decode a non-success response into the server's error message.
    async fn rejection(response: reqwest::Response) -> HordeError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(err) => HordeError::ServiceRejected { message: err.message },
            Err(_) => HordeError::ServiceRejected {
                message: format!("HTTP {}: {}", status, clip(&body, 200)),
            },
        }
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, HordeError> {
        let body = response.text().await?;
        serde_json::from_str(&body).map_err(|e| HordeError::InvalidResponse {
            reason: format!("JSON parse error: {}. Raw: {}", e, clip(&body, 200)),
        })
    }

    /// Poll a job to completion at the fixed cadence, then fetch it.
    pub async fn wait_for_job(&self, id: &str) -> Result<JobStatus, HordeError> {
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            let check = self.check_job(id).await?;
            if check.done || check.faulted || !check.is_possible {
                return self.get_job(id).await;
            }
        }
    }
}

#[async_trait]
impl JobApi for HordeClient {
    async fn create_job(&self, prompt: &str) -> Result<String, HordeError> {
        let url = self.url("generate/async");
        tracing::debug!(%url, prompt_len = prompt.len(), "Submitting generation job");

        let body = JobCreateRequest {
            prompt,
            params: &self.sampler,
            models: &self.models,
            workers: &[],
        };
        let response = self
            .send_retrying(|| {
                self.client
                    .post(&url)
                    .header("apikey", self.api_key.expose_secret())
                    .json(&body)
            })
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(Self::rejection(response).await);
        }
        let created: JobCreateResponse = Self::decode(response).await?;
        tracing::debug!(job_id = %created.id, "Job accepted");
        Ok(created.id)
    }

    async fn check_job(&self, id: &str) -> Result<JobCheck, HordeError> {
        let url = self.url(&format!("generate/check/{id}"));
        let response = self.send_retrying(|| self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Self::decode(response).await
    }

    async fn get_job(&self, id: &str) -> Result<JobStatus, HordeError> {
        let url = self.url(&format!("generate/status/{id}"));
        let response = self.send_retrying(|| self.client.get(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Self::decode(response).await
    }

    async fn cancel_job(&self, id: &str) -> Result<(), HordeError> {
        let url = self.url(&format!("generate/status/{id}"));
        tracing::debug!(job_id = %id, "Cancelling job");
        let response = self.send_retrying(|| self.client.delete(&url)).await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }
        Ok(())
    }
}

/// Truncate to at most `max` bytes without splitting a character.
fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Parse the `Retry-After` wait hint: seconds (fractional allowed) or an
/// absolute RFC 2822 timestamp.
fn retry_after_hint(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let value = headers.get(reqwest::header::RETRY_AFTER)?.to_str().ok()?;
    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds));
        }
        return None;
    }
    let at = chrono::DateTime::parse_from_rfc2822(value).ok()?;
    let wait = at.signed_duration_since(chrono::Utc::now());
    wait.to_std().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue, RETRY_AFTER};

    #[test]
    fn retry_after_parses_whole_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("3"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_secs(3)));
    }

    #[test]
    fn retry_after_parses_fractional_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("0.25"));
        assert_eq!(retry_after_hint(&headers), Some(Duration::from_millis(250)));
    }

    #[test]
    fn retry_after_parses_absolute_timestamp() {
        let future = chrono::Utc::now() + chrono::Duration::seconds(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&future.to_rfc2822()).unwrap(),
        );
        let wait = retry_after_hint(&headers).expect("parsed");
        assert!(wait <= Duration::from_secs(30));
        assert!(wait >= Duration::from_secs(25));
    }

    #[test]
    fn retry_after_missing_or_garbage_yields_none() {
        let headers = HeaderMap::new();
        assert_eq!(retry_after_hint(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(retry_after_hint(&headers), None);
    }

    #[test]
    fn past_absolute_timestamp_yields_none() {
        let past = chrono::Utc::now() - chrono::Duration::seconds(30);
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_str(&past.to_rfc2822()).unwrap(),
        );
        assert_eq!(retry_after_hint(&headers), None);
    }

    #[test]
    fn clip_never_splits_a_character() {
        // 300 bytes of three-byte characters; byte 200 falls mid-char.
        let body = "日".repeat(100);
        let clipped = clip(&body, 200);
        assert_eq!(clipped.len(), 198);
        assert_eq!(clipped.chars().count(), 66);
        assert_eq!(clip("short", 200), "short");
        assert_eq!(clip("", 200), "");
    }

    #[test]
    fn url_joins_without_double_slashes() {
        let client = HordeClient::new(
            "https://example.test/api/v2/",
            SecretString::from(crate::config::ANONYMOUS_API_KEY.to_string()),
        )
        .unwrap();
        assert_eq!(
            client.url("generate/async"),
            "https://example.test/api/v2/generate/async"
        );
        assert_eq!(
            client.url("/generate/check/abc"),
            "https://example.test/api/v2/generate/check/abc"
        );
    }

    #[test]
    fn sampler_defaults_serialize_with_expected_values() {
        let sampler = SamplerSettings::default();
        let json = serde_json::to_value(&sampler).unwrap();
        assert_eq!(json["max_length"], 80);
        assert_eq!(json["max_context_length"], 1024);
        assert_eq!(json["temperature"], 0.62);
        assert_eq!(json["singleline"], true);
        assert_eq!(json["sampler_order"][0], 6);
    }

    #[test]
    fn job_check_defaults_tolerate_sparse_payloads() {
        let check: JobCheck = serde_json::from_str("{\"done\": true}").unwrap();
        assert!(check.done);
        assert!(!check.faulted);
        assert!(check.is_possible);
    }

    #[test]
    fn job_status_flattens_check_fields() {
        let status: JobStatus = serde_json::from_str(
            r#"{"done": true, "faulted": false, "generations": [{"text": "hi"}]}"#,
        )
        .unwrap();
        assert!(status.check.done);
        assert_eq!(status.generations[0].text, "hi");
    }
}
