//! sluiced: drives synthetic load through Sluice queues.
//!
//! Registers two request types, then submits a burst of requests through
//! admission control and logs how each one was answered. Useful for
//! watching dispatch, expiry and load shedding with `RUST_LOG=debug`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinSet;

use sluice_core::config::SluiceConfig;
use sluice_queue::{AdmissionController, QueueOptions, QueueRegistry, ResponseStatus};

/// Sum the bytes of a buffer.
struct Checksum {
    data: Vec<u8>,
}

/// Simulated slow backend call.
struct SlowLookup {
    delay_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = SluiceConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SluiceConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SluiceConfig::default()
    });

    let burst: usize = match std::env::args().nth(1) {
        Some(arg) => arg.parse().context("burst size must be a number")?,
        None => 250,
    };
    tracing::info!(burst, limit = config.admission.limit, "sluiced starting");

    // ── Wiring ───────────────────────────────────────────────────────────────

    let mut builder = QueueRegistry::builder();
    builder.register::<Checksum, u64, _, _>(
        "checksum",
        QueueOptions::from(&config.queue_settings("checksum")),
        |env| async move {
            Ok(env.payload().data.iter().map(|&b| u64::from(b)).sum())
        },
    )?;
    builder.register::<SlowLookup, u64, _, _>(
        "slow_lookup",
        QueueOptions::from(&config.queue_settings("slow_lookup")),
        |env| async move {
            let delay = env.payload().delay_ms;
            if delay == 0 {
                anyhow::bail!("lookup with zero delay is not supported");
            }
            tokio::time::sleep(Duration::from_millis(delay)).await;
            Ok(delay)
        },
    )?;
    let registry = Arc::new(builder.build());
    let admission = AdmissionController::from_config(registry.clone(), &config.admission);

    // ── Depth printer ────────────────────────────────────────────────────────

    let depth_printer = {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let snapshot: serde_json::Map<String, serde_json::Value> = registry
                    .snapshot()
                    .into_iter()
                    .map(|(name, depth)| (name, depth.into()))
                    .collect();
                tracing::info!(
                    total = registry.total_depth(),
                    queues = %serde_json::Value::Object(snapshot),
                    "queue depth snapshot"
                );
            }
        })
    };

    // ── Load ─────────────────────────────────────────────────────────────────

    let checksums = registry
        .queue::<Checksum, u64>()
        .context("checksum queue not registered")?;
    let lookups = registry
        .queue::<SlowLookup, u64>()
        .context("slow_lookup queue not registered")?;

    let mut requests = JoinSet::new();
    let (mut ok, mut timed_out, mut failed, mut shed) = (0usize, 0usize, 0usize, 0usize);

    // Requests are queued before the next admission check so the gate sees
    // the backlog it protects; only the wait runs in a task.
    for n in 0..burst {
        if admission.is_overloaded() {
            shed += 1;
            continue;
        }
        let queued = if n % 2 == 0 {
            let data = vec![(n % 256) as u8; 64];
            checksums
                .enqueue(Checksum { data })
                .map(|env| requests.spawn(async move { env.wait().await.status }))
        } else {
            let delay_ms = ((n % 5) * 100) as u64;
            lookups
                .enqueue(SlowLookup { delay_ms })
                .map(|env| requests.spawn(async move { env.wait().await.status }))
        };
        if let Err(e) = queued {
            tracing::warn!(error = %e, "request rejected");
            failed += 1;
        }
    }

    let wait_all = async {
        while let Some(joined) = requests.join_next().await {
            match joined {
                Ok(ResponseStatus::Success) => ok += 1,
                Ok(ResponseStatus::RequestTimeout) => timed_out += 1,
                Ok(ResponseStatus::InternalError) => failed += 1,
                Err(e) => {
                    tracing::error!(error = %e, "request task failed");
                    failed += 1;
                }
            }
        }
    };

    tokio::select! {
        _ = wait_all => {}
        _ = tokio::signal::ctrl_c() => tracing::info!("shutdown signal received"),
    }

    tracing::info!(ok, timed_out, failed, shed, "load finished");
    depth_printer.abort();

    Ok(())
}
