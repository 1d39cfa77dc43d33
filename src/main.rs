use std::sync::Arc;

use announcement_notifier::{
    api::run_api_server,
    clients::{
        auth::{AccessTokenSource, GcpTokenSource},
        fcm::{FcmClient, FcmSettings},
        firestore::{FirestoreClient, FirestoreSettings},
        health::HealthChecker,
        rbmq::RabbitMqClient,
        redis::RedisLedger,
    },
    config::Config,
    dispatcher::Dispatcher,
    telemetry::init_tracing,
    worker::{AnnouncementHandler, run_worker},
};
use anyhow::{Error, Result};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(config.log_json);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let token_source: Arc<dyn AccessTokenSource> =
        Arc::new(GcpTokenSource::from_environment().await?);

    let firestore = Arc::new(FirestoreClient::new(
        FirestoreSettings::from_config(&config),
        Arc::clone(&token_source),
    )?);
    let fcm = Arc::new(FcmClient::new(
        FcmSettings::from_config(&config),
        Arc::clone(&token_source),
    )?);

    let mut dispatcher = Dispatcher::new(firestore.clone(), fcm, config.dispatch_config());
    if config.prune_stale_tokens {
        info!("Stale token pruning enabled");
        dispatcher = dispatcher.with_pruner(firestore);
    }

    let ledger = match &config.redis_url {
        Some(url) => Some(Arc::new(
            RedisLedger::connect(
                url,
                config.idempotency_ttl_seconds,
                config.processing_lease_seconds,
            )
            .await?,
        )),
        None => {
            info!("REDIS_URL not set, redelivered events will be dispatched again");
            None
        }
    };

    let mut handler = AnnouncementHandler::new(Arc::new(dispatcher));
    if let Some(ledger) = &ledger {
        handler = handler.with_ledger(ledger.clone());
    }

    let rabbit = Arc::new(RabbitMqClient::connect(&config).await?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let health_checker = HealthChecker::new(Arc::clone(&rabbit), ledger, token_source);
    let api = tokio::spawn(run_api_server(
        config.server_port,
        health_checker,
        shutdown_rx.clone(),
    ));

    let signal_tx = Arc::clone(&shutdown_tx);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = signal_tx.send(true);
    });

    let worker_result = run_worker(
        Arc::clone(&rabbit),
        Arc::new(handler),
        config.worker_concurrency,
        shutdown_rx,
    )
    .await;

    let _ = shutdown_tx.send(true);

    match api.await {
        Ok(Err(e)) => error!(error = %e, "Health check server failed"),
        Err(e) => error!(error = %e, "Health check server task panicked"),
        Ok(Ok(())) => {}
    }

    if let Err(e) = rabbit.close().await {
        error!(error = %e, "RabbitMQ shutdown failed");
    }

    worker_result
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
