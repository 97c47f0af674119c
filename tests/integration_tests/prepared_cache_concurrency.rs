use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use cassandra_native_driver::prepared::{ClaimOutcome, PrepareKey, PreparedCache};

/// Fires many concurrent `claim()` calls for the same key from real
/// tokio tasks (not sequential calls on one thread) and checks that
/// exactly one task is told to prepare while the rest wait on it.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn only_one_concurrent_claimant_prepares() {
    let cache = Arc::new(PreparedCache::new(16));
    let key = PrepareKey { keyspace: None, query: "SELECT * FROM t WHERE k = ?".to_string() };

    let preparers = Arc::new(AtomicUsize::new(0));
    let waiters = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let cache = cache.clone();
        let key = key.clone();
        let preparers = preparers.clone();
        let waiters = waiters.clone();
        handles.push(tokio::spawn(async move {
            match cache.claim(&key) {
                ClaimOutcome::YouPrepare => {
                    preparers.fetch_add(1, Ordering::SeqCst);
                },
                ClaimOutcome::Wait(_) => {
                    waiters.fetch_add(1, Ordering::SeqCst);
                },
                ClaimOutcome::Cached(_) => unreachable!("nothing resolved this key yet"),
            }
        }));
    }

    for handle in handles {
        handle.await.expect("task panicked");
    }

    assert_eq!(preparers.load(Ordering::SeqCst), 1);
    assert_eq!(waiters.load(Ordering::SeqCst), 31);
}
