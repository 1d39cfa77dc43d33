use std::{
    collections::{HashMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use announcement_notifier::{
    clients::{DeliveryLedger, PushGateway, TokenPruner, UserDirectory, auth::AccessTokenSource},
    error::{GatewayError, StoreError},
    models::{
        announcement::Target,
        fcm::{DeliveryFailure, MulticastMessage, MulticastResponse, TokenFailure, TokenOutcome},
        status::DeliveryStatus,
        user::{StaleToken, User},
    },
};
use async_trait::async_trait;

pub fn user(id: &str, role: &str, token: Option<&str>) -> User {
    User {
        id: id.to_string(),
        role: Some(role.to_string()),
        fcm_token: token.map(str::to_string),
    }
}

/// Applies the target filter to a fixed set of users.
pub struct InMemoryDirectory {
    users: Vec<User>,
    fail: bool,
    queries: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new(users: Vec<User>) -> Self {
        Self {
            users,
            fail: false,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            users: Vec::new(),
            fail: true,
            queries: AtomicUsize::new(0),
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn find_recipients(&self, target: &Target) -> Result<Vec<User>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);

        if self.fail {
            return Err(StoreError::Rejected {
                status: 503,
                message: "UNAVAILABLE: store offline".to_string(),
            });
        }

        Ok(self
            .users
            .iter()
            .filter(|user| target.matches(user.role.as_deref()))
            .cloned()
            .collect())
    }
}

/// Records every multicast and answers from configured failures.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<MulticastMessage>>,
    unreachable: HashSet<String>,
    rejected: HashMap<String, DeliveryFailure>,
    delay: Option<Duration>,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any batch carrying this token fails at the transport level.
    pub fn unreachable_for(mut self, token: &str) -> Self {
        self.unreachable.insert(token.to_string());
        self
    }

    pub fn rejecting(mut self, token: &str, reason: DeliveryFailure) -> Self {
        self.rejected.insert(token.to_string(), reason);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn sent(&self) -> Vec<MulticastMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_tokens(&self) -> HashSet<String> {
        self.sent()
            .into_iter()
            .flat_map(|message| message.tokens)
            .collect()
    }
}

#[async_trait]
impl PushGateway for RecordingGateway {
    async fn send_multicast(
        &self,
        message: &MulticastMessage,
    ) -> Result<MulticastResponse, GatewayError> {
        self.sent.lock().unwrap().push(message.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if message
            .tokens
            .iter()
            .any(|token| self.unreachable.contains(token))
        {
            return Err(GatewayError::Transport("connection refused".to_string()));
        }

        let outcomes = message
            .tokens
            .iter()
            .enumerate()
            .map(|(index, token)| match self.rejected.get(token) {
                Some(reason) => TokenOutcome::Failed(TokenFailure {
                    token: token.clone(),
                    reason: *reason,
                    detail: "rejected".to_string(),
                }),
                None => TokenOutcome::Delivered {
                    token: token.clone(),
                    message_id: format!("projects/campus/messages/{}", index),
                },
            })
            .collect();

        Ok(MulticastResponse { outcomes })
    }
}

#[derive(Default)]
pub struct RecordingPruner {
    pruned: Mutex<Vec<StaleToken>>,
}

impl RecordingPruner {
    pub fn pruned(&self) -> Vec<StaleToken> {
        self.pruned.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenPruner for RecordingPruner {
    async fn prune(&self, stale: &[StaleToken]) -> Result<usize, StoreError> {
        self.pruned.lock().unwrap().extend_from_slice(stale);
        Ok(stale.len())
    }
}

#[derive(Default)]
pub struct InMemoryLedger {
    statuses: Mutex<HashMap<String, DeliveryStatus>>,
}

impl InMemoryLedger {
    pub fn status(&self, announcement_id: &str) -> DeliveryStatus {
        self.statuses
            .lock()
            .unwrap()
            .get(announcement_id)
            .copied()
            .unwrap_or(DeliveryStatus::NotFound)
    }
}

#[async_trait]
impl DeliveryLedger for InMemoryLedger {
    async fn claim(&self, announcement_id: &str) -> anyhow::Result<DeliveryStatus> {
        let mut statuses = self.statuses.lock().unwrap();
        let previous = statuses
            .get(announcement_id)
            .copied()
            .unwrap_or(DeliveryStatus::NotFound);

        if previous.allows_dispatch() {
            statuses.insert(announcement_id.to_string(), DeliveryStatus::Processing);
        }

        Ok(previous)
    }

    async fn record(&self, announcement_id: &str, status: DeliveryStatus) -> anyhow::Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(announcement_id.to_string(), status);
        Ok(())
    }
}

pub struct FailingTokenSource;

#[async_trait]
impl AccessTokenSource for FailingTokenSource {
    async fn access_token(&self, _scopes: &[&str]) -> Result<String, String> {
        Err("no application default credentials".to_string())
    }
}
