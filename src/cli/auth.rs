use anyhow::{Result, anyhow};
use std::io::{self, Write};

use crate::core::AppConfig;
use crate::google::oauth::{
    REQUEST_TIMEOUT, StoredToken, consent_url, exchange_code_for_token, extract_code,
    http_client, load_client_secrets, load_saved_credentials, save_credentials,
};

/// Walk the user through Google's consent screen and persist the
/// resulting refresh token.
pub async fn run(config: &AppConfig) -> Result<StoredToken> {
    let secrets = load_client_secrets(&config.credentials_path)?;
    let redirect_uri = secrets.redirect_uri().to_string();

    println!(
        "\nPlease open the following URL in your browser and authorize access:\n\n{}\n",
        consent_url(&secrets.client_id, &redirect_uri)
    );
    print!("Paste the authorization code (or the URL you were redirected to) here: ");
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let code = extract_code(&input)?;

    let token = exchange_code_for_token(
        &http_client(REQUEST_TIMEOUT)?,
        &config.oauth_token_url,
        &secrets.client_id,
        &secrets.client_secret,
        &code,
        &redirect_uri,
    )
    .await?;
    let refresh_token = token
        .refresh_token
        .ok_or(anyhow!("No refresh token in response"))?;

    let stored = StoredToken::new(&secrets, &refresh_token);
    save_credentials(&config.token_path, &stored)?;
    println!("Refresh token saved to {}.", config.token_path);

    Ok(stored)
}

/// The saved token, or a fresh one from the consent flow on first run.
pub async fn ensure_token(config: &AppConfig) -> Result<StoredToken> {
    if let Some(token) = load_saved_credentials(&config.token_path) {
        return Ok(token);
    }
    tracing::info!("No saved token at {}, starting consent flow", config.token_path);
    run(config).await
}
