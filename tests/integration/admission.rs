use std::sync::Arc;

use sluice_queue::{AdmissionController, QueueOptions, QueueRegistry};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Admission control across queues
// ══════════════════════════════════════════════════════════════════════════════

struct Upload(u32);
struct Render(u32);

/// Two queues with backlogs 3 and 4 against a limit of 5: overloaded.
/// Draining one queue brings the total to 3: admitted again.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_overload_tracks_total_backlog() {
    let upload_gate = Arc::new(Semaphore::new(0));
    let render_gate = Arc::new(Semaphore::new(0));

    let mut builder = QueueRegistry::builder();
    let uploads = builder
        .register::<Upload, u32, _, _>(
            "uploads",
            QueueOptions::with_capacity(1),
            gated_handler(upload_gate.clone(), |u: &Upload| u.0),
        )
        .unwrap();
    let renders = builder
        .register::<Render, u32, _, _>(
            "renders",
            QueueOptions::with_capacity(1),
            gated_handler(render_gate.clone(), |r: &Render| r.0),
        )
        .unwrap();
    let registry = Arc::new(builder.build());
    let admission = AdmissionController::new(registry.clone(), 5);

    assert!(!admission.is_overloaded());

    // With capacity 1 one request executes and one waits in the
    // dispatcher for a permit; the rest stay queued.
    for n in 0..5 {
        uploads.enqueue(Upload(n)).unwrap();
    }
    for n in 0..6 {
        renders.enqueue(Render(n)).unwrap();
    }
    wait_for_condition(5, || uploads.queue_length() == 3 && renders.queue_length() == 4)
        .await
        .unwrap();

    assert_eq!(admission.total_depth(), 7);
    assert!(admission.is_overloaded());
    assert_eq!(
        registry.snapshot(),
        vec![("renders".to_string(), 4), ("uploads".to_string(), 3)]
    );

    render_gate.add_permits(1_000);
    wait_for_condition(5, || renders.queue_length() == 0).await.unwrap();
    assert_eq!(admission.total_depth(), 3);
    assert!(!admission.is_overloaded());

    // Every extra un-dispatched request adds exactly one.
    uploads.enqueue(Upload(100)).unwrap();
    assert_eq!(admission.total_depth(), 4);
    assert!(!admission.is_overloaded());
    uploads.enqueue(Upload(101)).unwrap();
    assert_eq!(admission.total_depth(), 5);
    assert!(admission.is_overloaded());

    upload_gate.add_permits(1_000);
    wait_for_condition(5, || !admission.is_overloaded()).await.unwrap();
}

/// Intake that checks admission before submitting sheds the excess.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_intake_sheds_when_overloaded() {
    let gate = Arc::new(Semaphore::new(0));
    let mut builder = QueueRegistry::builder();
    let uploads = builder
        .register::<Upload, u32, _, _>(
            "uploads",
            QueueOptions::with_capacity(1),
            gated_handler(gate.clone(), |u: &Upload| u.0),
        )
        .unwrap();
    let admission = AdmissionController::new(Arc::new(builder.build()), 3);

    // Occupy the worker and the dispatcher first.
    uploads.enqueue(Upload(0)).unwrap();
    uploads.enqueue(Upload(1)).unwrap();
    wait_for_condition(5, || uploads.queue_length() == 0 && uploads.in_flight() == 1)
        .await
        .unwrap();

    let mut admitted = 0;
    let mut shed = 0;
    for n in 2..20 {
        if admission.is_overloaded() {
            shed += 1;
        } else {
            uploads.enqueue(Upload(n)).unwrap();
            admitted += 1;
        }
    }

    assert_eq!(admitted, 3);
    assert_eq!(shed, 15);

    gate.add_permits(1_000);
    wait_for_condition(5, || uploads.pending_len() == 0).await.unwrap();
}

/// Queue synchronously, wait in tasks: the gate sees every admitted request,
/// and every admitted request is still answered.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_intake_queues_before_spawning_waits() {
    let gate = Arc::new(Semaphore::new(0));
    let mut builder = QueueRegistry::builder();
    builder
        .register::<Render, u32, _, _>(
            "renders",
            QueueOptions::with_capacity(1),
            gated_handler(gate.clone(), |r: &Render| r.0),
        )
        .unwrap();
    let registry = Arc::new(builder.build());
    let admission = AdmissionController::new(registry.clone(), 4);
    let renders = registry.queue::<Render, u32>().expect("renders registered");

    let mut waits = tokio::task::JoinSet::new();
    let mut shed = 0;
    for n in 0..50 {
        if admission.is_overloaded() {
            shed += 1;
            continue;
        }
        let envelope = renders.enqueue(Render(n)).unwrap();
        waits.spawn(async move { envelope.wait().await.data });
    }

    // The dispatcher can pop two while the loop runs (one executing, one
    // waiting for the permit), so four to six get in.
    assert!(waits.len() >= 4 && waits.len() <= 6, "admitted {}", waits.len());
    assert_eq!(shed, 50 - waits.len());

    gate.add_permits(1_000);
    let mut answered = 0;
    while let Some(joined) = waits.join_next().await {
        assert!(joined.unwrap().is_some());
        answered += 1;
    }
    assert_eq!(answered, 50 - shed);
}
