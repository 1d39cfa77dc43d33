use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures_util::{StreamExt, stream};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    clients::{PushGateway, TokenPruner, UserDirectory},
    config::DispatchConfig,
    error::DispatchError,
    models::{
        announcement::Announcement,
        dispatch::{BatchReport, BatchResult, DispatchOutcome, DispatchReport},
        fcm::{FcmNotification, MulticastMessage},
        user::{StaleToken, User},
    },
};

/// Fans one announcement out to every matching device.
///
/// Holds no per-invocation state, so a single instance can serve concurrent
/// announcements.
pub struct Dispatcher {
    directory: Arc<dyn UserDirectory>,
    gateway: Arc<dyn PushGateway>,
    pruner: Option<Arc<dyn TokenPruner>>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        directory: Arc<dyn UserDirectory>,
        gateway: Arc<dyn PushGateway>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            directory,
            gateway,
            pruner: None,
            config,
        }
    }

    pub fn with_pruner(mut self, pruner: Arc<dyn TokenPruner>) -> Self {
        self.pruner = Some(pruner);
        self
    }

    pub async fn dispatch(
        &self,
        announcement: &Announcement,
    ) -> Result<DispatchOutcome, DispatchError> {
        let dispatch_id = Uuid::new_v4();
        let deadline = self.config.deadline.map(|budget| Instant::now() + budget);

        let users = self
            .directory
            .find_recipients(&announcement.target)
            .await
            .map_err(|source| {
                error!(
                    %dispatch_id,
                    announcement_id = %announcement.id,
                    error = %source,
                    "Recipient query failed"
                );
                DispatchError::Query {
                    announcement_id: announcement.id.clone(),
                    source,
                }
            })?;

        let tokens = extract_tokens(&users);

        info!(
            %dispatch_id,
            announcement_id = %announcement.id,
            recipients = users.len(),
            tokens = tokens.len(),
            "Recipients resolved"
        );

        if tokens.is_empty() {
            info!(
                %dispatch_id,
                announcement_id = %announcement.id,
                "No device tokens found, nothing to send"
            );
            return Ok(DispatchOutcome::NoRecipients {
                announcement_id: announcement.id.clone(),
                recipients: users.len(),
            });
        }

        let token_count = tokens.len();
        let batches = partition(&tokens, self.config.batch_size);
        let notification = FcmNotification {
            title: announcement.title.clone(),
            body: announcement.body.clone(),
        };

        let mut reports: Vec<BatchReport> = stream::iter(batches.into_iter().enumerate())
            .map(|(index, batch)| {
                self.send_batch(&announcement.id, &notification, index, batch, deadline)
            })
            .buffer_unordered(self.config.batch_concurrency.max(1))
            .collect()
            .await;
        reports.sort_by_key(|report| report.index);

        let report = DispatchReport {
            announcement_id: announcement.id.clone(),
            recipients: users.len(),
            tokens: token_count,
            batches: reports,
        };

        if report.is_partial_failure() {
            warn!(
                %dispatch_id,
                announcement_id = %announcement.id,
                batches = report.batches.len(),
                failed_batches = report.failed_batches().count(),
                delivered = report.delivered_count(),
                failed_tokens = report.failed_token_count(),
                "Announcement dispatched with failed batches"
            );
        } else {
            info!(
                %dispatch_id,
                announcement_id = %announcement.id,
                batches = report.batches.len(),
                delivered = report.delivered_count(),
                failed_tokens = report.failed_token_count(),
                "Announcement dispatched"
            );
        }

        if let Some(pruner) = &self.pruner {
            self.prune_stale(pruner.as_ref(), &users, &report).await;
        }

        Ok(DispatchOutcome::Dispatched(report))
    }

    async fn send_batch(
        &self,
        announcement_id: &str,
        notification: &FcmNotification,
        index: usize,
        tokens: Vec<String>,
        deadline: Option<Instant>,
    ) -> BatchReport {
        if let Some(deadline) = deadline {
            if Instant::now() + self.config.deadline_margin >= deadline {
                warn!(
                    announcement_id,
                    batch = index,
                    size = tokens.len(),
                    "Deadline reached, batch not sent"
                );
                return BatchReport {
                    index,
                    tokens,
                    result: BatchResult::Abandoned,
                };
            }
        }

        let message = MulticastMessage {
            announcement_id: announcement_id.to_string(),
            notification: notification.clone(),
            tokens,
        };

        let sent = match deadline {
            Some(deadline) => timeout_at(deadline, self.gateway.send_multicast(&message))
                .await
                .ok(),
            None => Some(self.gateway.send_multicast(&message).await),
        };

        let result = match sent {
            Some(Ok(response)) => {
                let succeeded = response.success_count();
                let failures = response.into_failures();

                info!(
                    announcement_id,
                    batch = index,
                    size = message.tokens.len(),
                    succeeded,
                    failed = failures.len(),
                    "Batch sent"
                );

                BatchResult::Sent {
                    succeeded,
                    failures,
                }
            }
            Some(Err(e)) => {
                error!(
                    announcement_id,
                    batch = index,
                    size = message.tokens.len(),
                    error = %e,
                    "Batch could not reach push gateway"
                );

                BatchResult::TransportFailed {
                    reason: e.to_string(),
                }
            }
            None => {
                warn!(
                    announcement_id,
                    batch = index,
                    size = message.tokens.len(),
                    "Deadline passed while batch was in flight"
                );

                BatchResult::Abandoned
            }
        };

        BatchReport {
            index,
            tokens: message.tokens,
            result,
        }
    }

    async fn prune_stale(&self, pruner: &dyn TokenPruner, users: &[User], report: &DispatchReport) {
        let stale = stale_entries(users, report);
        if stale.is_empty() {
            return;
        }

        match pruner.prune(&stale).await {
            Ok(pruned) => info!(
                announcement_id = %report.announcement_id,
                stale = stale.len(),
                pruned,
                "Stale device tokens pruned"
            ),
            Err(e) => warn!(
                announcement_id = %report.announcement_id,
                error = %e,
                "Stale token pruning failed"
            ),
        }
    }
}

/// Distinct non-empty device tokens, in first-seen order.
pub fn extract_tokens(users: &[User]) -> Vec<String> {
    let mut seen = HashSet::new();

    users
        .iter()
        .filter_map(User::device_token)
        .filter(|token| seen.insert(*token))
        .map(str::to_string)
        .collect()
}

/// Splits tokens into consecutive batches of at most `limit` entries.
pub fn partition(tokens: &[String], limit: usize) -> Vec<Vec<String>> {
    tokens
        .chunks(limit.max(1))
        .map(<[String]>::to_vec)
        .collect()
}

fn stale_entries(users: &[User], report: &DispatchReport) -> Vec<StaleToken> {
    let stale: HashSet<&str> = report.stale_tokens().into_iter().collect();
    if stale.is_empty() {
        return Vec::new();
    }

    let mut owners: HashMap<&str, Vec<&str>> = HashMap::new();
    for user in users {
        if let Some(token) = user.device_token().filter(|token| stale.contains(token)) {
            owners.entry(token).or_default().push(&user.id);
        }
    }

    debug!(
        announcement_id = %report.announcement_id,
        stale_tokens = stale.len(),
        "Mapping stale tokens to users"
    );

    owners
        .into_iter()
        .flat_map(|(token, ids)| {
            ids.into_iter().map(move |id| StaleToken {
                user_id: id.to_string(),
                token: token.to_string(),
            })
        })
        .collect()
}
