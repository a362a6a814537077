use std::env;
use std::path::PathBuf;

pub const DEFAULT_LABEL_NAME: &str = "Custom_Label";
pub const DEFAULT_REPLY_BODY: &str = "The user will reply ASAP.\n\nThis is an automated mail!";
pub const DEFAULT_GMAIL_API_URL: &str = "https://gmail.googleapis.com";
pub const DEFAULT_OAUTH_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub storage_path: String,
    pub credentials_path: String,
    pub token_path: String,
    pub label_name: String,
    pub reply_body: String,
    pub min_interval_secs: u64,
    pub max_interval_secs: u64,
    pub gmail_api_url: String,
    pub oauth_token_url: String,
}

fn secs_from_env(name: &str, default: u64) -> u64 {
    parse_secs(name, env::var(name).ok().as_deref(), default)
}

/// An unset variable means the default. A value that isn't a whole
/// number of seconds is reported and also falls back to the default.
fn parse_secs(name: &str, value: Option<&str>, default: u64) -> u64 {
    let Some(value) = value else {
        return default;
    };
    match value.trim().parse() {
        Ok(secs) => secs,
        Err(e) => {
            tracing::warn!(
                "Ignoring {}={:?} ({}), using {} seconds",
                name,
                value,
                e,
                default
            );
            default
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let storage_path = env::var("AUTOREPLY_STORAGE_PATH").unwrap_or("./".to_string());
        let credentials_path = PathBuf::from(&storage_path)
            .join("credentials.json")
            .display()
            .to_string();
        let token_path = PathBuf::from(&storage_path)
            .join("token.json")
            .display()
            .to_string();
        let label_name =
            env::var("AUTOREPLY_LABEL_NAME").unwrap_or_else(|_| DEFAULT_LABEL_NAME.to_string());
        let reply_body =
            env::var("AUTOREPLY_REPLY_BODY").unwrap_or_else(|_| DEFAULT_REPLY_BODY.to_string());
        let min_interval_secs = secs_from_env("AUTOREPLY_MIN_INTERVAL_SECS", 45);
        let max_interval_secs = secs_from_env("AUTOREPLY_MAX_INTERVAL_SECS", 120);
        let gmail_api_url = env::var("AUTOREPLY_GMAIL_API_URL")
            .unwrap_or_else(|_| DEFAULT_GMAIL_API_URL.to_string());
        let oauth_token_url = env::var("AUTOREPLY_OAUTH_TOKEN_URL")
            .unwrap_or_else(|_| DEFAULT_OAUTH_TOKEN_URL.to_string());

        Self {
            storage_path,
            credentials_path,
            token_path,
            label_name,
            reply_body,
            min_interval_secs,
            max_interval_secs,
            gmail_api_url,
            oauth_token_url,
        }
    }
}

impl AppConfig {
    /// Inclusive polling bounds in seconds. A misconfigured pair where
    /// min > max is swapped rather than rejected.
    pub fn interval_bounds(&self) -> (u64, u64) {
        if self.min_interval_secs <= self.max_interval_secs {
            (self.min_interval_secs, self.max_interval_secs)
        } else {
            (self.max_interval_secs, self.min_interval_secs)
        }
    }
}
