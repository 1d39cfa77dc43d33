use crate::models::fcm::TokenFailure;

#[derive(Debug, Clone, PartialEq)]
pub enum BatchResult {
    Sent {
        succeeded: usize,
        failures: Vec<TokenFailure>,
    },
    TransportFailed {
        reason: String,
    },
    /// The invocation deadline arrived before this batch completed.
    Abandoned,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub index: usize,
    pub tokens: Vec<String>,
    pub result: BatchResult,
}

impl BatchReport {
    pub fn size(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_failed(&self) -> bool {
        !matches!(self.result, BatchResult::Sent { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchReport {
    pub announcement_id: String,
    pub recipients: usize,
    pub tokens: usize,
    pub batches: Vec<BatchReport>,
}

impl DispatchReport {
    pub fn delivered_count(&self) -> usize {
        self.batches
            .iter()
            .map(|batch| match &batch.result {
                BatchResult::Sent { succeeded, .. } => *succeeded,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_token_count(&self) -> usize {
        self.batches
            .iter()
            .map(|batch| match &batch.result {
                BatchResult::Sent { failures, .. } => failures.len(),
                _ => 0,
            })
            .sum()
    }

    pub fn failed_batches(&self) -> impl Iterator<Item = &BatchReport> {
        self.batches.iter().filter(|batch| batch.is_failed())
    }

    /// True when at least one batch never reached the gateway.
    pub fn is_partial_failure(&self) -> bool {
        self.failed_batches().next().is_some()
    }

    pub fn stale_tokens(&self) -> Vec<&str> {
        self.batches
            .iter()
            .filter_map(|batch| match &batch.result {
                BatchResult::Sent { failures, .. } => Some(failures),
                _ => None,
            })
            .flatten()
            .filter(|failure| failure.reason.is_stale())
            .map(|failure| failure.token.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    NoRecipients {
        announcement_id: String,
        recipients: usize,
    },
    Dispatched(DispatchReport),
}

impl DispatchOutcome {
    pub fn is_partial_failure(&self) -> bool {
        match self {
            DispatchOutcome::NoRecipients { .. } => false,
            DispatchOutcome::Dispatched(report) => report.is_partial_failure(),
        }
    }
}
