//! Background polling fallback for missed webhooks.

use std::time::Duration;

use chrono::Utc;
use common::PaymentId;
use domain::PaymentStatus;
use futures_util::{StreamExt, stream};
use store::{Store, StoreTx};
use tokio::sync::watch;

use crate::error::Result;
use crate::reconciler::{ReconcileOutcome, Reconciler};

/// What one polling pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PollSummary {
    /// Attempts whose provider was polled.
    pub polled: usize,
    /// Polls that changed state.
    pub applied: usize,
    /// Stranded attempts moved to `failed`.
    pub expired: usize,
}

/// Periodically refreshes open payment attempts.
///
/// Attempts with a provider reference are polled with bounded concurrency.
/// Attempts that never got one and are older than `stale_after` were stranded
/// between claiming the payment slot and calling the provider; they are
/// failed so the order can be retried.
pub struct PaymentPoller<S: Store> {
    store: S,
    reconciler: Reconciler<S>,
    interval: Duration,
    stale_after: Duration,
    concurrency: usize,
}

impl<S: Store + Clone> PaymentPoller<S> {
    pub fn new(store: S, reconciler: Reconciler<S>, interval: Duration, stale_after: Duration) -> Self {
        Self {
            store,
            reconciler,
            interval,
            stale_after,
            concurrency: 8,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Polls every `interval` until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "payment poller started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "payment poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("payment poller stopped");
    }

    /// Runs a single polling pass.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<PollSummary> {
        let open = {
            let mut tx = self.store.begin().await?;
            tx.active_payments().await?
        };

        let mut summary = PollSummary::default();
        let now = Utc::now();

        let mut pollable = Vec::new();
        for attempt in open {
            if attempt.provider_reference.is_some() {
                pollable.push(attempt.id);
                continue;
            }
            let stale = (now - attempt.created_at)
                .to_std()
                .is_ok_and(|age| age > self.stale_after);
            if stale && self.expire(attempt.id).await? {
                summary.expired += 1;
            }
        }

        summary.polled = pollable.len();
        let outcomes: Vec<_> = stream::iter(pollable)
            .map(|payment_id| async move { (payment_id, self.reconciler.refresh(payment_id).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (payment_id, outcome) in outcomes {
            match outcome {
                Ok(ReconcileOutcome::Applied(_)) => summary.applied += 1,
                Ok(ReconcileOutcome::NoOp) => {}
                Err(err) => tracing::warn!(%payment_id, error = %err, "payment refresh failed"),
            }
        }

        if summary != PollSummary::default() {
            tracing::info!(
                polled = summary.polled,
                applied = summary.applied,
                expired = summary.expired,
                "payment poll complete"
            );
        }
        Ok(summary)
    }

    async fn expire(&self, payment_id: PaymentId) -> Result<bool> {
        let mut tx = self.store.begin().await?;
        let Some(found) = tx.payment(payment_id).await? else {
            return Ok(false);
        };
        tx.lock_order(found.order_id).await?;

        let Some(mut attempt) = tx.payment(payment_id).await? else {
            return Ok(false);
        };
        if attempt.status != PaymentStatus::Initiated || attempt.provider_reference.is_some() {
            return Ok(false);
        }

        attempt.fail("payment initiation did not complete");
        let expired = tx.update_payment(&attempt, PaymentStatus::Initiated).await?;
        tx.commit().await?;
        if expired {
            tracing::warn!(%payment_id, order_id = %attempt.order_id, "stale payment attempt expired");
        }
        Ok(expired)
    }
}
