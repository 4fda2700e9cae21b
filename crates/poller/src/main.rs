use std::sync::Arc;
use std::time::Duration;

use badgewatch_catalog::{BackoffClient, CatalogClient};
use badgewatch_common::config::AppConfig;
use badgewatch_common::http::{HttpTransport, ReqwestTransport};
use badgewatch_engine::{ChangeDetector, FirstSightPolicy, SnapshotStore};
use badgewatch_notifier::{EmbedStyle, SecondaryWebhook, WebhookDispatcher};
use badgewatch_poller::BadgePoller;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "badgewatch_poller=info,badgewatch_catalog=info,badgewatch_notifier=info,badgewatch_engine=info"
                    .into()
            }),
        )
        .json()
        .init();

    tracing::info!("Badgewatch starting...");

    // Load configuration
    let config = AppConfig::from_env()?;

    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new(Duration::from_secs(
        config.http_timeout_seconds,
    ))?);

    let catalog = CatalogClient::new(
        BackoffClient::new(transport.clone()),
        &config.catalog_base_url,
        &config.thumbnail_base_url,
    );

    let mut dispatcher = WebhookDispatcher::new(transport.clone(), &config.webhook_url)
        .with_mention(&config.webhook_mention)
        .with_style(EmbedStyle {
            author: config.embed_author.clone(),
            footer: config.embed_footer.clone(),
            footer_icon: config.embed_footer_icon.clone(),
        });
    if let Some(url) = &config.secondary_webhook_url {
        tracing::info!("Secondary per-badge webhook enabled");
        dispatcher = dispatcher.with_secondary(Arc::new(SecondaryWebhook::new(transport.clone(), url)));
    }
    let dispatcher = Arc::new(dispatcher);

    let first_sight = if config.notify_on_first_sight {
        FirstSightPolicy::Notify
    } else {
        FirstSightPolicy::Seed
    };

    let poller = BadgePoller::new(
        catalog,
        dispatcher.clone(),
        SnapshotStore::new(&config.snapshot_path),
        &config.universes_path,
    )
    .with_detector(ChangeDetector::new(first_sight))
    .with_max_concurrent(config.max_concurrent_universes);

    let result = match config.poll_interval_seconds {
        None => poller.run_once().await.map(|_| ()),
        Some(interval) => run_loop(&poller, Duration::from_secs(interval)).await,
    };

    dispatcher.close().await;

    if let Err(e) = &result {
        tracing::error!(error = %e, "Badgewatch exited with error");
    }
    tracing::info!("Badgewatch stopped.");
    result
}

/// Repeat passes with a fixed delay until Ctrl+C.
async fn run_loop(poller: &BadgePoller, interval: Duration) -> anyhow::Result<()> {
    tracing::info!(interval_secs = interval.as_secs(), "Polling loop started");

    loop {
        let pass = poller.run_once();
        tokio::pin!(pass);

        tokio::select! {
            result = &mut pass => log_pass_error(result),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, finishing current pass...");
                log_pass_error(pass.await);
                return Ok(());
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal, stopping gracefully...");
                return Ok(());
            }
        }
    }
}

// A failed pass is retried on the next tick.
fn log_pass_error(result: anyhow::Result<badgewatch_poller::RunSummary>) {
    if let Err(e) = result {
        tracing::error!(error = %e, "Pass failed");
    }
}
