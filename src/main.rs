use anyhow::{Context, Result};
use asin_pricer::batch::{BatchRunner, TokioPacer};
use asin_pricer::config::AppConfig;
use asin_pricer::session::Session;
use asin_pricer::sources::{IdentifierSource, RecordSink};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let identifiers = IdentifierSource::new(config.source.clone()).load().await?;

    let session =
        Session::acquire(&config.session).context("browser session could not be started")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Ctrl-C received, finishing current ASIN then stopping");
            on_signal.cancel();
        }
    });

    let mut runner = BatchRunner::new(config.batch.clone(), config.navigator())
        .with_pacer(TokioPacer::cancellable(cancel.clone()));
    let report = runner.run(&session, &identifiers, &cancel).await;
    session.release();

    let destination = RecordSink::new(config.target.clone())
        .write(&report.records, Utc::now())
        .await?;

    info!(
        "Pricing scraping completed. Success: {}, Failed: {}",
        report.succeeded, report.failed
    );
    info!("Results saved to {}", destination);
    if report.interrupted {
        warn!("Batch was interrupted; unprocessed ASINs are marked in the output");
    }
    Ok(())
}
