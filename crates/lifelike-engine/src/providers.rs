use std::collections::BTreeMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use lifelike_contracts::config::Settings;
use reqwest::Client as HttpClient;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::media::NormalizedMedia;

const SYSTEM_INSTRUCTION: &str = "You are an expert creative technologist. \
Study the attached image or document, if any, together with the user's prompt \
and bring it to life as a fully interactive web experience. Respond with one \
complete, self-contained HTML document: inline all CSS and JavaScript, do not \
reference local files, and use inline SVG, emoji or CSS shapes instead of \
external images. Return only the HTML, without commentary or markdown fences.";

const DEFAULT_USER_PROMPT: &str = "Bring this to life as an interactive web app.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub media: Option<NormalizedMedia>,
}

/// Turns a prompt and optional media into an HTML document.
///
/// `Ok(None)` means the service answered but produced no artifact.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>>;
}

#[derive(Default, Clone)]
pub struct GenerationProviderRegistry {
    providers: BTreeMap<String, Arc<dyn GenerationProvider>>,
}

impl GenerationProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: GenerationProvider + 'static>(&mut self, provider: P) {
        self.providers
            .insert(provider.name().to_string(), Arc::new(provider));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn GenerationProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(settings: &Settings) -> GenerationProviderRegistry {
    let mut providers = GenerationProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(GeminiProvider::new(settings));
    providers
}

/// Offline provider: a deterministic page derived from the prompt.
pub struct DryrunProvider;

#[async_trait]
impl GenerationProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
        let (r, g, b) = color_from_prompt(&request.prompt);
        let title = if request.prompt.trim().is_empty() {
            "Untitled"
        } else {
            request.prompt.trim()
        };
        let media_note = match request.media.as_ref() {
            Some(media) => format!(
                "<p class=\"media\">source: {} ({} base64 chars)</p>",
                media.mime_type,
                media.base64.len()
            ),
            None => String::new(),
        };
        Ok(Some(format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
<title>{title}</title>\n<style>body{{margin:0;min-height:100vh;display:grid;\
place-items:center;background:rgb({r},{g},{b});font-family:sans-serif}}\
button{{font-size:1.5rem;padding:.5em 1em}}</style>\n</head>\n<body \
data-artifact=\"{id}\">\n<main>\n<h1>{title}</h1>\n{media_note}\n\
<button onclick=\"this.textContent=Number(this.textContent)+1\">0</button>\n\
</main>\n</body>\n</html>\n",
            title = escape_html(title),
            id = short_id(&request.prompt),
        )))
    }
}

pub struct GeminiProvider {
    api_base: String,
    model: String,
    http: HttpClient,
    timeout_s: f64,
    max_retries: usize,
    retry_backoff_s: f64,
}

impl GeminiProvider {
    pub fn new(settings: &Settings) -> Self {
        Self {
            api_base: env::var("GEMINI_API_BASE")
                .ok()
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string()),
            model: settings.model.clone(),
            http: HttpClient::new(),
            timeout_s: settings.request_timeout_s,
            max_retries: settings.transport_retries,
            retry_backoff_s: settings.retry_backoff_s,
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"))
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

    fn build_payload(request: &GenerationRequest) -> Value {
        let mut parts = Vec::new();
        if let Some(media) = request.media.as_ref() {
            parts.push(json!({
                "inlineData": {
                    "mimeType": media.mime_type,
                    "data": media.base64,
                }
            }));
        }
        let prompt = if request.prompt.trim().is_empty() {
            DEFAULT_USER_PROMPT
        } else {
            request.prompt.as_str()
        };
        parts.push(json!({ "text": prompt }));

        json!({
            "systemInstruction": {
                "parts": [{ "text": SYSTEM_INSTRUCTION }],
            },
            "contents": [{
                "role": "user",
                "parts": parts,
            }],
        })
    }

    async fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(Duration::from_secs_f64(self.timeout_s))
                .json(payload)
                .send()
                .await;

            match response {
                Ok(ok) => return Ok(ok),
                Err(raw) => {
                    let retryable = raw.is_timeout() || raw.is_connect() || raw.is_request();
                    let err = anyhow::Error::new(raw)
                        .context(format!("Gemini request failed ({endpoint})"));
                    if !retryable || attempt >= self.max_retries {
                        return Err(err);
                    }
                    attempt += 1;
                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "Gemini transport retry after transient request failure"
                    );
                    let delay_s = self.retry_backoff_s * attempt as f64;
                    tokio::time::sleep(Duration::from_secs_f64(delay_s)).await;
                }
            }
        }
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<Option<String>> {
        let Some(api_key) = Self::api_key() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = self.endpoint_for_model(&self.model);
        let payload = Self::build_payload(request);
        tracing::info!(
            model = %self.model,
            has_media = request.media.is_some(),
            prompt_chars = request.prompt.chars().count(),
            "requesting generation from Gemini"
        );

        let response = self
            .post_with_transport_retries(&endpoint, &api_key, &payload)
            .await?;
        let body = response_json_or_error("Gemini", response).await?;
        Ok(extract_html(&body))
    }
}

/// First non-empty text candidate with any markdown code fence removed.
pub fn extract_html(response_payload: &Value) -> Option<String> {
    let candidates = response_payload
        .get("candidates")
        .and_then(Value::as_array)?;
    let text: String = candidates
        .iter()
        .filter_map(|candidate| {
            candidate
                .get("content")
                .and_then(|content| content.get("parts"))
                .and_then(Value::as_array)
        })
        .map(|parts| {
            parts
                .iter()
                .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect::<String>()
        })
        .find(|text| !text.trim().is_empty())?;

    let html = strip_code_fence(&text);
    if html.is_empty() {
        None
    } else {
        Some(html.to_string())
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(newline) => &rest[newline + 1..],
        None => "",
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

async fn response_json_or_error(provider: &str, response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn escape_html(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn color_from_prompt(prompt: &str) -> (u8, u8, u8) {
    let digest = Sha256::digest(prompt.as_bytes());
    (digest[0], digest[1], digest[2])
}

fn short_id(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
