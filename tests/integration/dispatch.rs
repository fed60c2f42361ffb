use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sluice_queue::{BoundedWorkQueue, QueueOptions, ResponseStatus};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Dispatch, concurrency bound and ordering
// ══════════════════════════════════════════════════════════════════════════════

/// capacity=2, 50 ms doubling handler, five concurrent submissions:
/// three dispatch rounds of at most two executions.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_burst_of_five_with_two_workers() {
    let queue = BoundedWorkQueue::<u64, u64>::start("double", QueueOptions::with_capacity(2), |env| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(*env.payload() * 2)
    })
    .unwrap();

    let start = Instant::now();
    let responses = futures::future::join_all((1..=5u64).map(|n| queue.submit(n))).await;
    let elapsed = start.elapsed();

    for (n, response) in (1..=5u64).zip(&responses) {
        assert_eq!(response.status, ResponseStatus::Success, "payload {n}");
        assert_eq!(response.data, Some(n * 2), "payload {n}");
    }
    println!("five requests over two workers took {elapsed:?}");
    assert!(elapsed >= Duration::from_millis(145), "finished too fast: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(600), "finished too slow: {elapsed:?}");
}

/// No burst size pushes concurrent executions past capacity.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_large_burst_respects_capacity() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let queue = {
        let running = running.clone();
        let peak = peak.clone();
        BoundedWorkQueue::<usize, usize>::start("bounded", QueueOptions::with_capacity(4), move |env| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(*env.payload())
            }
        })
        .unwrap()
    };
    let queue = Arc::new(queue);

    // Submit from many tasks at once, not from one sequential loop.
    let mut tasks = Vec::new();
    for n in 0..200 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move { queue.submit(n).await }));
    }
    for (n, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap();
        assert_eq!(response.data, Some(n));
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 4, "peak concurrency {peak} exceeded capacity");
    assert_eq!(queue.pending_len(), 0);
    // Permits are released just after the response is attached.
    wait_for_condition(5, || queue.in_flight() == 0).await.unwrap();
}

/// Requests submitted earlier are dispatched no later than later ones.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dispatch_is_fifo() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let queue = {
        let started = started.clone();
        BoundedWorkQueue::<u32, u32>::start("fifo", QueueOptions::with_capacity(1), move |env| {
            started.lock().unwrap().push(*env.payload());
            async move { Ok(0) }
        })
        .unwrap()
    };

    let envelopes: Vec<_> = (0..50).map(|n| queue.enqueue(n).unwrap()).collect();
    for envelope in &envelopes {
        assert_eq!(envelope.wait().await.status, ResponseStatus::Success);
    }

    assert_eq!(*started.lock().unwrap(), (0..50).collect::<Vec<_>>());
}

/// Each envelope gets exactly one response and leaves tracking.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_request_answered_once() {
    let queue = BoundedWorkQueue::<u32, u32>::start("once", QueueOptions::with_capacity(3), |env| async move {
        Ok(*env.payload() + 1)
    })
    .unwrap();

    let envelopes: Vec<_> = (0..100).map(|n| queue.enqueue(n).unwrap()).collect();
    for (n, envelope) in envelopes.iter().enumerate() {
        let response = envelope.wait().await;
        assert_eq!(response.data, Some(n as u32 + 1));
        // Waiting again returns the same, already attached, response.
        assert_eq!(envelope.wait().await, response);
    }

    wait_for_condition(5, || queue.pending_len() == 0).await.unwrap();
    assert_eq!(queue.queue_length(), 0);
}
