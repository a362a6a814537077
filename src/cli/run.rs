use anyhow::{Context, Result};

use super::auth;
use crate::core::AppConfig;
use crate::google::gmail::GmailClient;
use crate::google::oauth::{Authenticator, REQUEST_TIMEOUT, http_client};
use crate::triage::{Session, run_forever};

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Unable to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

pub async fn run(config: &AppConfig, once: bool) -> Result<()> {
    let token = auth::ensure_token(config).await?;
    let auth = Authenticator::new(
        http_client(REQUEST_TIMEOUT)?,
        &config.oauth_token_url,
        token,
    );
    let gmail = GmailClient::new(&config.gmail_api_url, auth);

    let mut session = Session::bootstrap(&gmail, &config.label_name, &config.reply_body)
        .await
        .context("Startup failed")?;
    println!("Service Started!");

    if once {
        session.check_and_send_reply(&gmail).await?;
        return Ok(());
    }

    run_forever(
        &mut session,
        &gmail,
        config.interval_bounds(),
        shutdown_signal(),
    )
    .await;

    Ok(())
}
