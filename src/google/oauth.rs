//! OAuth2 plumbing for Google APIs: client secrets, the persisted
//! refresh token and short-lived access tokens.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Upper bound on any single Google API request.
pub const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub const GMAIL_MODIFY_SCOPE: &str = "https://www.googleapis.com/auth/gmail.modify";
const CONSENT_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const DEFAULT_REDIRECT_URI: &str = "urn:ietf:wg:oauth:2.0:oob";

/// Client id and secret as downloaded from the Google Cloud console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

impl ClientSecrets {
    pub fn redirect_uri(&self) -> &str {
        self.redirect_uris
            .first()
            .map(String::as_str)
            .unwrap_or(DEFAULT_REDIRECT_URI)
    }
}

// The console wraps the secrets in either an `installed` or `web` key
// depending on the application type.
#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

pub fn load_client_secrets(path: impl AsRef<Path>) -> Result<ClientSecrets> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read client secrets from {}", path.display()))?;
    let file: ClientSecretsFile = serde_json::from_str(&content)
        .with_context(|| format!("Invalid client secrets file {}", path.display()))?;
    file.installed
        .or(file.web)
        .ok_or(anyhow!("Client secrets file has neither `installed` nor `web` key"))
}

/// The refresh token persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

impl StoredToken {
    pub fn new(secrets: &ClientSecrets, refresh_token: &str) -> Self {
        Self {
            kind: String::from("authorized_user"),
            client_id: secrets.client_id.clone(),
            client_secret: secrets.client_secret.clone(),
            refresh_token: refresh_token.to_string(),
        }
    }
}

/// Load the saved token if there is a usable one. Anything unreadable is
/// treated as absent so the caller falls back to the consent flow.
pub fn load_saved_credentials(path: impl AsRef<Path>) -> Option<StoredToken> {
    let path = path.as_ref();
    let content = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!("No saved token at {}: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str(&content) {
        Ok(token) => Some(token),
        Err(e) => {
            tracing::warn!("Ignoring malformed token file {}: {}", path.display(), e);
            None
        }
    }
}

/// Write `token.json`. The file holds the refresh token and client
/// secret so on unix it is only readable by the owner.
pub fn save_credentials(path: impl AsRef<Path>, token: &StoredToken) -> Result<()> {
    let path = path.as_ref();
    let payload = serde_json::to_string(token)?;
    let mut file = open_private(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))?;
    file.write_all(payload.as_bytes())
        .with_context(|| format!("Failed to write token to {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation, tighten a file left by an older run
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

/// URL the user opens to grant the app access to their mailbox.
pub fn consent_url(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
        CONSENT_URL,
        urlencoding::encode(client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(GMAIL_MODIFY_SCOPE)
    )
}

/// Accept either the bare authorization code or the whole URL the
/// browser was redirected to.
pub fn extract_code(input: &str) -> Result<String> {
    let input = input.trim();
    if !input.contains("code=") {
        return Ok(input.to_string());
    }
    let url = reqwest::Url::parse(input).context("Could not parse redirect URL")?;
    url.query_pairs()
        .find(|(k, _)| k == "code")
        .map(|(_, v)| v.into_owned())
        .ok_or(anyhow!("No code parameter in redirect URL"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthResponse {
    pub access_token: String,
    pub expires_in: Option<i64>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub token_type: Option<String>,
}

/// The HTTP client shared by the token endpoint and the Gmail API.
pub fn http_client(timeout: std::time::Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("Failed to build HTTP client")
}

async fn token_request(
    client: &Client,
    token_url: &str,
    params: &[(&str, &str)],
) -> Result<OAuthResponse> {
    let res = client.post(token_url).form(params).send().await?;
    let status = res.status();
    let text = res.text().await.unwrap_or_default();
    if !status.is_success() {
        anyhow::bail!("Token request failed: {} ({})", status, text);
    }
    let token: OAuthResponse = serde_json::from_str(&text)?;
    Ok(token)
}

pub async fn exchange_code_for_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    code: &str,
    redirect_uri: &str,
) -> Result<OAuthResponse> {
    token_request(
        client,
        token_url,
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ],
    )
    .await
}

pub async fn refresh_access_token(
    client: &Client,
    token_url: &str,
    client_id: &str,
    client_secret: &str,
    refresh_token: &str,
) -> Result<OAuthResponse> {
    token_request(
        client,
        token_url,
        &[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ],
    )
    .await
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    // Refresh a minute early so a token never expires mid-request
    fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at - Duration::seconds(60)
    }
}

/// Hands out access tokens for the stored refresh token, refreshing
/// them when they are about to expire.
pub struct Authenticator {
    client: Client,
    token_url: String,
    stored: StoredToken,
    cached: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    pub fn new(client: Client, token_url: &str, stored: StoredToken) -> Self {
        Self {
            client,
            token_url: token_url.to_string(),
            stored,
            cached: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.access_token.clone());
        }

        let StoredToken {
            client_id,
            client_secret,
            refresh_token,
            ..
        } = &self.stored;
        let oauth = refresh_access_token(
            &self.client,
            &self.token_url,
            client_id,
            client_secret,
            refresh_token,
        )
        .await
        .context("Failed to refresh access token")?;
        tracing::debug!("Refreshed access token");

        let expires_at = Utc::now() + Duration::seconds(oauth.expires_in.unwrap_or(3600));
        let access_token = oauth.access_token;
        *cached = Some(CachedToken {
            access_token: access_token.clone(),
            expires_at,
        });
        Ok(access_token)
    }
}
