//! Expiry sweeper: answers requests that have waited too long.
//!
//! Every `sweep_interval` the sweeper collects pending envelopes older than
//! the queue's expiry threshold, oldest first, and claims each one by
//! removing it from `pending`. A claimed envelope without a response gets a
//! timeout response and its submitter is woken. Envelopes already claimed by
//! a worker are skipped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use crate::envelope::ResponseEnvelope;
use crate::queue::{panic_message, PendingMap, QueueShared};

/// Runs until the owning queue is dropped.
pub(crate) async fn sweep_loop<Req, Resp>(shared: Arc<QueueShared<Req, Resp>>, interval: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    // A long sweep delays the next tick instead of queueing a burst.
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let swept = std::panic::catch_unwind(AssertUnwindSafe(|| {
            sweep_expired(&shared.pending, shared.expiry)
        }));

        match swept {
            Ok(0) => {}
            Ok(expired) => {
                tracing::debug!(queue = %shared.name, expired, "timed out stale requests");
            }
            Err(panic) => {
                tracing::error!(
                    queue = %shared.name,
                    panic = %panic_message(panic.as_ref()),
                    "expiry sweep failed"
                );
            }
        }
    }
}

/// Time out every envelope older than `expiry`. Returns how many this call
/// claimed.
///
/// Scans repeat until one finds nothing, so envelopes crossing the threshold
/// mid-sweep are picked up in the same pass.
pub(crate) fn sweep_expired<Req, Resp>(pending: &PendingMap<Req, Resp>, expiry: Duration) -> usize {
    let mut claimed = 0;

    loop {
        let mut expired: Vec<(Instant, String)> = pending
            .iter()
            .filter(|entry| entry.value().is_expired(expiry))
            .map(|entry| (entry.value().created_at(), entry.key().clone()))
            .collect();

        if expired.is_empty() {
            break;
        }
        expired.sort();

        for (_, id) in expired {
            // Lost the race to a worker.
            let Some((_, envelope)) = pending.remove(&id) else {
                continue;
            };

            if envelope.response().is_none() {
                envelope.respond(ResponseEnvelope::timeout());
            }
            envelope.signal();
            claimed += 1;

            tracing::trace!(
                id = %id,
                age_ms = envelope.created_at().elapsed().as_millis() as u64,
                "request expired"
            );
        }
    }

    claimed
}
