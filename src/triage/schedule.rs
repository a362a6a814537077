use std::future::Future;
use std::time::Duration;

use rand::Rng;

use super::{IterationReport, MailService, Session};

/// Draw the delay before the next pass, uniformly from the inclusive
/// `(min, max)` bounds in seconds.
pub fn next_delay<R: Rng + ?Sized>(rng: &mut R, bounds: (u64, u64)) -> Duration {
    let (min, max) = bounds;
    Duration::from_secs(rng.gen_range(min..=max))
}

/// Run a single pass. Errors end the pass, not the loop.
pub async fn run_pass(session: &mut Session, service: &dyn MailService) -> Option<IterationReport> {
    tracing::info!("Checking for new mails...");
    match session.check_and_send_reply(service).await {
        Ok(report) => Some(report),
        Err(e) => {
            tracing::error!("Triage pass failed: {:#}", e);
            None
        }
    }
}

/// Run one pass immediately, then keep running passes with a freshly
/// drawn delay after each one finishes, until `shutdown` resolves.
///
/// The delay is armed only after a pass completes so passes never
/// overlap. Shutdown is observed between passes.
pub async fn run_forever<F>(
    session: &mut Session,
    service: &dyn MailService,
    bounds: (u64, u64),
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    run_pass(session, service).await;
    loop {
        let delay = next_delay(&mut rand::thread_rng(), bounds);
        tracing::debug!("Next check in {}s", delay.as_secs());

        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down, watermark {}", session.watermark());
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        run_pass(session, service).await;
    }
}
