use std::sync::Arc;

use anyhow::{Error, Result};
use futures_util::StreamExt;
use tokio::{
    sync::{Semaphore, watch},
    task::JoinSet,
};
use tracing::{debug, error, info, warn};

use crate::{
    clients::{DeliveryLedger, rbmq::RabbitMqClient},
    dispatcher::Dispatcher,
    models::{
        announcement::Announcement, dispatch::DispatchOutcome, message::DlqMessage,
        status::DeliveryStatus,
    },
};

/// What to do with a queue delivery once it has been handled.
#[derive(Debug)]
pub enum DeliveryAction {
    Ack,
    DeadLetter(DlqMessage),
}

/// Turns one creation event into one dispatcher invocation.
pub struct AnnouncementHandler {
    dispatcher: Arc<Dispatcher>,
    ledger: Option<Arc<dyn DeliveryLedger>>,
}

impl AnnouncementHandler {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            ledger: None,
        }
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn DeliveryLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn handle(&self, payload: &[u8]) -> DeliveryAction {
        let announcement = match Announcement::from_json(payload) {
            Ok(announcement) => announcement,
            Err(e) => {
                warn!(error = %e, "Discarding invalid announcement event");
                return DeliveryAction::DeadLetter(DlqMessage::new(None, payload, e.to_string()));
            }
        };

        if let Some(ledger) = &self.ledger {
            match ledger.claim(&announcement.id).await {
                Ok(DeliveryStatus::Processing) => {
                    warn!(
                        announcement_id = %announcement.id,
                        "Announcement is claimed by an unfinished delivery, dead-lettering"
                    );
                    return DeliveryAction::DeadLetter(DlqMessage::new(
                        Some(announcement.id.clone()),
                        payload,
                        "Delivery already in progress; the earlier attempt did not finish".to_string(),
                    ));
                }
                Ok(status) if !status.allows_dispatch() => {
                    info!(
                        announcement_id = %announcement.id,
                        status = %status,
                        "Announcement already handled, skipping redelivery"
                    );
                    return DeliveryAction::Ack;
                }
                Ok(status) => {
                    debug!(announcement_id = %announcement.id, previous = %status, "Delivery claimed");
                }
                Err(e) => {
                    warn!(
                        announcement_id = %announcement.id,
                        error = %e,
                        "Delivery ledger unavailable, dispatching without redelivery check"
                    );
                }
            }
        }

        match self.dispatcher.dispatch(&announcement).await {
            Ok(outcome) => {
                let status = match &outcome {
                    DispatchOutcome::Dispatched(report) if report.is_partial_failure() => {
                        DeliveryStatus::Partial
                    }
                    _ => DeliveryStatus::Sent,
                };
                self.record(&announcement.id, status).await;
                DeliveryAction::Ack
            }
            Err(e) => {
                self.record(&announcement.id, DeliveryStatus::Failed).await;
                DeliveryAction::DeadLetter(DlqMessage::new(
                    Some(announcement.id.clone()),
                    payload,
                    e.to_string(),
                ))
            }
        }
    }

    async fn record(&self, announcement_id: &str, status: DeliveryStatus) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.record(announcement_id, status).await {
                warn!(announcement_id, status = %status, error = %e, "Failed to update delivery ledger");
            }
        }
    }
}

async fn settle(rabbit: &RabbitMqClient, delivery_tag: u64, action: DeliveryAction) -> Result<(), Error> {
    match action {
        DeliveryAction::Ack => rabbit.acknowledge(delivery_tag).await,
        DeliveryAction::DeadLetter(message) => match rabbit.publish_to_dlq(&message).await {
            Ok(()) => rabbit.reject(delivery_tag, false).await,
            Err(e) => {
                error!(error = %e, "Dead-letter publish failed, requeueing delivery");
                rabbit.reject(delivery_tag, true).await
            }
        },
    }
}

/// Consumes creation events until `shutdown` fires, then waits for in-flight
/// deliveries to settle.
pub async fn run_worker(
    rabbit: Arc<RabbitMqClient>,
    handler: Arc<AnnouncementHandler>,
    concurrency: usize,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let mut consumer = rabbit.create_consumer().await?;
    let limiter = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    info!(concurrency, "Announcement worker started");

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                info!("Shutdown requested, no longer consuming");
                break;
            }
            delivery = consumer.next() => {
                let Some(delivery) = delivery else {
                    warn!("Consumer stream closed");
                    break;
                };

                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(e) => {
                        error!(error = %e, "Failed to receive delivery");
                        continue;
                    }
                };

                let permit = limiter.clone().acquire_owned().await?;
                let rabbit = Arc::clone(&rabbit);
                let handler = Arc::clone(&handler);

                tasks.spawn(async move {
                    let _permit = permit;
                    let delivery_tag = delivery.delivery_tag;
                    let action = handler.handle(&delivery.data).await;

                    if let Err(e) = settle(&rabbit, delivery_tag, action).await {
                        error!(delivery_tag, error = %e, "Failed to settle delivery");
                    }
                });
            }
        }

        while let Some(joined) = tasks.try_join_next() {
            if let Err(e) = joined {
                error!(error = %e, "Delivery task panicked");
            }
        }
    }

    let in_flight = tasks.len();
    if in_flight > 0 {
        info!(in_flight, "Waiting for in-flight deliveries");
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!(error = %e, "Delivery task panicked");
        }
    }

    info!("Announcement worker stopped");
    Ok(())
}
