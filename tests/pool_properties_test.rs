//! Property tests for connection pool exclusivity and capacity bounds.

mod common;

use cmdflow_core::execution::ConnectionPool;
use cmdflow_core::stats::StatsCollector;
use common::{ok, ScriptedTransport};
use futures::future::join_all;
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Property: concurrent leases never exceed capacity, never share a
    /// connection, and the idle set never grows past capacity
    #[test]
    fn leases_are_exclusive_and_bounded(capacity in 1usize..5, workers in 1usize..16, holds in prop::collection::vec(0u64..3, 16)) {
        let rt = runtime();
        let (max_in_use, idle_after, leased_after, shared) = rt.block_on(async move {
            let transport = ScriptedTransport::new(|_, _| ok(json!(null)));
            let stats = Arc::new(StatsCollector::new());
            let pool = ConnectionPool::new(transport, capacity, Duration::from_secs(5), stats);

            let in_use = Arc::new(AtomicUsize::new(0));
            let max_in_use = Arc::new(AtomicUsize::new(0));
            let held_ids = Arc::new(parking_lot::Mutex::new(HashSet::new()));
            let shared = Arc::new(AtomicUsize::new(0));

            let tasks = (0..workers).map(|worker| {
                let pool = pool.clone();
                let in_use = in_use.clone();
                let max_in_use = max_in_use.clone();
                let held_ids = held_ids.clone();
                let shared = shared.clone();
                let hold = Duration::from_millis(holds[worker]);
                tokio::spawn(async move {
                    let lease = pool.acquire().await.unwrap();
                    let id = lease.id();
                    if !held_ids.lock().insert(id) {
                        shared.fetch_add(1, Ordering::SeqCst);
                    }
                    let now = in_use.fetch_add(1, Ordering::SeqCst) + 1;
                    max_in_use.fetch_max(now, Ordering::SeqCst);

                    tokio::time::sleep(hold).await;

                    in_use.fetch_sub(1, Ordering::SeqCst);
                    held_ids.lock().remove(&id);
                    pool.release(lease);
                })
            });
            for joined in join_all(tasks).await {
                joined.unwrap();
            }

            (
                max_in_use.load(Ordering::SeqCst),
                pool.idle_count(),
                pool.leased_count(),
                shared.load(Ordering::SeqCst),
            )
        });

        prop_assert!(max_in_use <= capacity, "{} leases outstanding with capacity {}", max_in_use, capacity);
        prop_assert!(idle_after <= capacity);
        prop_assert_eq!(leased_after, 0);
        prop_assert_eq!(shared, 0, "a connection was leased twice at once");
    }
}

#[tokio::test]
async fn test_acquire_times_out_when_exhausted() {
    let transport = ScriptedTransport::new(|_, _| ok(json!(null)));
    let pool = ConnectionPool::new(
        transport,
        1,
        Duration::from_millis(50),
        Arc::new(StatsCollector::new()),
    );

    let held = pool.acquire().await.unwrap();
    let second = pool.acquire().await;
    assert!(matches!(
        second,
        Err(cmdflow_core::execution::PoolError::ResourceUnavailable { .. })
    ));

    pool.release(held);
    assert!(pool.acquire().await.is_ok());
}
