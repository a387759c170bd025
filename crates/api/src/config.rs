use std::env;

use url::Url;

use crate::error::ApiError;

pub const ENV_BASE_URL: &str = "NUTRIO_API_BASE_URL";
pub const ENV_IDENTITY_URL: &str = "NUTRIO_IDENTITY_URL";
pub const ENV_API_KEY: &str = "NUTRIO_API_KEY";
pub const ENV_DEBUG: &str = "NUTRIO_DEBUG";

const DEFAULT_BASE_URL: &str = "https://api.nutrio.app/";
const DEFAULT_IDENTITY_URL: &str = "https://identity.nutrio.app/";
const DEFAULT_ASSETS_PREFIX: &str = "/assets";

/// Configuration for the request pipeline.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Requests outside this base URL bypass the pipeline entirely.
    pub base_url: Url,
    /// Identity provider endpoint.
    pub identity_url: Url,
    /// Product API key forwarded to the identity provider.
    pub api_key: String,
    /// Static assets under this path are served without augmentation.
    pub assets_prefix: String,
    /// IANA timezone name stamped on every augmented request.
    pub timezone: String,
    /// Widens the default log filter.
    pub debug: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base URL is valid"),
            identity_url: Url::parse(DEFAULT_IDENTITY_URL).expect("default identity URL is valid"),
            api_key: String::new(),
            assets_prefix: DEFAULT_ASSETS_PREFIX.to_owned(),
            timezone: local_timezone(),
            debug: false,
        }
    }
}

impl ApiConfig {
    /// Build a configuration from the environment, falling back to defaults.
    /// A `.env` file next to the process is honored when present.
    pub fn from_env() -> Result<Self, ApiError> {
        dotenvy::dotenv().ok();

        let mut config = Self::default();
        if let Ok(raw) = env::var(ENV_BASE_URL) {
            config.base_url = parse_url(ENV_BASE_URL, &raw)?;
        }
        if let Ok(raw) = env::var(ENV_IDENTITY_URL) {
            config.identity_url = parse_url(ENV_IDENTITY_URL, &raw)?;
        }
        if let Ok(key) = env::var(ENV_API_KEY) {
            config.api_key = key;
        }
        if let Ok(raw) = env::var(ENV_DEBUG) {
            config.debug = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_identity_url(mut self, identity_url: Url) -> Self {
        self.identity_url = identity_url;
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }
}

fn parse_url(name: &str, raw: &str) -> Result<Url, ApiError> {
    Url::parse(raw).map_err(|e| ApiError::configuration(format!("{name} `{raw}`: {e}")))
}

/// Local IANA timezone name, `UTC` when it cannot be determined.
pub fn local_timezone() -> String {
    iana_time_zone::get_timezone().unwrap_or_else(|_| "UTC".to_owned())
}
