use std::env;
use std::path::PathBuf;
use std::time::Duration;

use atelier_contracts::generation::DEFAULT_IMAGE_MODEL;

pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MAX_DIMENSION: u32 = 1024;

/// Runtime settings for the try-on pipeline.
#[derive(Debug, Clone)]
pub struct TryOnConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Trusted root that local-path references resolve under.
    pub asset_root: PathBuf,
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub fetch_timeout: Duration,
    pub generation_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
    pub user_agent: String,
}

impl Default for TryOnConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_GEMINI_API_BASE.to_string(),
            api_key: None,
            model: DEFAULT_IMAGE_MODEL.to_string(),
            asset_root: PathBuf::from("public"),
            max_dimension: DEFAULT_MAX_DIMENSION,
            jpeg_quality: 90,
            fetch_timeout: Duration::from_secs(30),
            generation_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_secs_f64(1.2),
            user_agent: format!("atelier-tryon/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TryOnConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Blank values count as
    /// unset; numbers are clamped and fall back to defaults when unparseable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        Self {
            api_base: get("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: get("GEMINI_API_KEY").or_else(|| get("GOOGLE_API_KEY")),
            model: get("ATELIER_IMAGE_MODEL").unwrap_or(defaults.model),
            asset_root: get("ATELIER_ASSET_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.asset_root),
            max_dimension: number_in_range(
                get("ATELIER_MAX_DIMENSION"),
                f64::from(defaults.max_dimension),
                256.0,
                4096.0,
            )
            .round() as u32,
            jpeg_quality: number_in_range(
                get("ATELIER_JPEG_QUALITY"),
                f64::from(defaults.jpeg_quality),
                50.0,
                100.0,
            )
            .round() as u8,
            fetch_timeout: Duration::from_secs_f64(number_in_range(
                get("ATELIER_FETCH_TIMEOUT"),
                30.0,
                2.0,
                120.0,
            )),
            generation_timeout: Duration::from_secs_f64(number_in_range(
                get("ATELIER_GENERATION_TIMEOUT"),
                90.0,
                15.0,
                300.0,
            )),
            transport_retries: number_in_range(get("ATELIER_TRANSPORT_RETRIES"), 2.0, 0.0, 4.0)
                .round() as usize,
            retry_backoff: Duration::from_secs_f64(number_in_range(
                get("ATELIER_RETRY_BACKOFF"),
                1.2,
                0.1,
                10.0,
            )),
            user_agent: defaults.user_agent,
        }
    }
}

fn number_in_range(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
