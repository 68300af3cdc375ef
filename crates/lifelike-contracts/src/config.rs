use std::env;
use std::path::PathBuf;

pub const HISTORY_STORAGE_KEY: &str = "creation_history";

pub const DEFAULT_SEED_URLS: &[&str] = &[
    "https://storage.googleapis.com/sideprojects-asronline/bringanythingtolife/vibecode-blog.json",
    "https://storage.googleapis.com/sideprojects-asronline/bringanythingtolife/cassette.json",
    "https://storage.googleapis.com/sideprojects-asronline/bringanythingtolife/chess.json",
];

pub const DEFAULT_PROVIDER: &str = "gemini";
pub const DEFAULT_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_HOME: &str = ".lifelike";

/// Runtime settings. Every field has an environment override; the CLI can
/// override again with flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub home: PathBuf,
    pub provider: String,
    pub model: String,
    pub seed_urls: Vec<String>,
    pub storage_quota_bytes: Option<usize>,
    pub request_timeout_s: f64,
    pub transport_retries: usize,
    pub retry_backoff_s: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let seed_urls = read("LIFELIKE_SEED_URLS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<String>>()
            })
            .unwrap_or_else(|| DEFAULT_SEED_URLS.iter().map(|url| url.to_string()).collect());

        Self {
            home: read("LIFELIKE_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME)),
            provider: read("LIFELIKE_PROVIDER").unwrap_or_else(|| DEFAULT_PROVIDER.to_string()),
            model: read("LIFELIKE_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            seed_urls,
            storage_quota_bytes: read("LIFELIKE_STORAGE_QUOTA_BYTES")
                .and_then(|value| value.parse::<usize>().ok())
                .filter(|value| *value > 0),
            request_timeout_s: clamped_f64(read("LIFELIKE_REQUEST_TIMEOUT"), 90.0, 15.0, 300.0),
            transport_retries: clamped_f64(read("LIFELIKE_TRANSPORT_RETRIES"), 2.0, 0.0, 4.0)
                .round() as usize,
            retry_backoff_s: clamped_f64(read("LIFELIKE_RETRY_BACKOFF"), 1.2, 0.1, 10.0),
        }
    }

    pub fn storage_path(&self) -> PathBuf {
        self.home.join("storage.json")
    }

    pub fn events_path(&self) -> PathBuf {
        self.home.join("events.jsonl")
    }
}

fn clamped_f64(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
