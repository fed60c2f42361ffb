//! Sluice integration test harness.
//!
//! End-to-end scenarios against real queues on a multi-threaded runtime.
//! Timings are real wall-clock; assertions leave generous upper bounds so
//! the suite stays stable on loaded CI machines.
//!
//!   cargo test --test integration

mod admission;
mod dispatch;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Semaphore;

use sluice_queue::{BoundedWorkQueue, QueueOptions, RequestEnvelope};

// ── Harness ───────────────────────────────────────────────────────────────────

/// Poll `cond` every 5 ms until it holds or `secs` elapse.
pub async fn wait_for_condition(secs: u64, mut cond: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            bail!("condition not met within {secs}s");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Handler that blocks until `gate` hands out a permit, then echoes a
/// number derived from the request.
pub fn gated_handler<Req>(
    gate: Arc<Semaphore>,
    value: fn(&Req) -> u32,
) -> impl Fn(Arc<RequestEnvelope<Req, u32>>) -> BoxFuture<'static, anyhow::Result<u32>> + Send + Sync + 'static
where
    Req: Send + Sync + 'static,
{
    move |env| {
        let gate = gate.clone();
        async move {
            let _ = gate.acquire().await;
            Ok::<_, anyhow::Error>(value(env.payload()))
        }
        .boxed()
    }
}

/// A queue whose handler never returns.
pub fn hung_queue(options: QueueOptions) -> BoundedWorkQueue<u32, u32> {
    BoundedWorkQueue::start("hung", options, |_| async {
        std::future::pending::<()>().await;
        Ok(0)
    })
    .expect("valid queue options")
}
