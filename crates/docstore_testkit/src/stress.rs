//! Stress and concurrency helpers.
//!
//! These run many operations against one collection, sequentially or from
//! several threads, and report what happened.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use docstore_codec::Value;
use docstore_core::{CoreResult, Database, DocumentCollection, LockMode, OperationOptions};

use crate::fixtures::doc;

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {} ===", name);
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform.
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            key_count: 200,
        }
    }
}

fn count(result: CoreResult<impl Sized>, successful: &mut usize, failed: &mut usize) {
    match result {
        Ok(_) => *successful += 1,
        Err(_) => *failed += 1,
    }
}

/// Inserts `config.operations` distinct documents one after another.
pub fn stress_sequential_writes(db: &Database, collection: &DocumentCollection, config: &StressConfig) -> StressTestResult {
    let options = OperationOptions::new();
    let trx = db.begin();
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let n = i64::try_from(i).unwrap_or(i64::MAX);
        count(
            collection.insert(&trx, &doc(&format!("s{i}"), n), &options, true),
            &mut successful,
            &mut failed,
        );
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Cycles insert, update and remove over `config.key_count` keys.
///
/// Operations on keys in the wrong state fail and are counted as failed.
pub fn stress_mixed_operations(db: &Database, collection: &DocumentCollection, config: &StressConfig) -> StressTestResult {
    let options = OperationOptions::new();
    let trx = db.begin();
    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = format!("m{}", i % config.key_count.max(1));
        let n = i64::try_from(i).unwrap_or(i64::MAX);
        let result = match i % 3 {
            0 => collection.insert(&trx, &doc(&key, n), &options, true),
            1 => collection.update(&trx, &doc(&key, n), &options, true),
            _ => collection.remove(&trx, &Value::from(key.as_str()), &options, true),
        };
        count(result, &mut successful, &mut failed);
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Inserts from `config.threads` threads, each with its own transaction
/// and its own key range.
pub fn stress_concurrent_writes(
    db: Arc<Database>,
    collection: Arc<DocumentCollection>,
    config: &StressConfig,
) -> StressTestResult {
    let successful = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(AtomicUsize::new(0));
    let threads = config.threads.max(1);
    let ops_per_thread = config.operations / threads;

    let start = Instant::now();
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let db = Arc::clone(&db);
            let collection = Arc::clone(&collection);
            let successful = Arc::clone(&successful);
            let failed = Arc::clone(&failed);

            thread::spawn(move || {
                let options = OperationOptions::new();
                for i in 0..ops_per_thread {
                    let trx = db.begin();
                    let n = i64::try_from(i).unwrap_or(i64::MAX);
                    match collection.insert(&trx, &doc(&format!("t{t}-{i}"), n), &options, true) {
                        Ok(_) => successful.fetch_add(1, Ordering::Relaxed),
                        Err(_) => failed.fetch_add(1, Ordering::Relaxed),
                    };
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Thread panicked");
    }

    StressTestResult::new(
        successful.load(Ordering::Relaxed),
        failed.load(Ordering::Relaxed),
        start.elapsed(),
    )
}

/// Two transactions take the write locks of `first` and `second` in
/// opposite order, meeting at a barrier in between.
///
/// Returns the outcome of each transaction's second lock request. Every
/// lock is released when the threads finish.
pub fn lock_in_opposite_order(
    db: Arc<Database>,
    first: Arc<DocumentCollection>,
    second: Arc<DocumentCollection>,
    timeout: Duration,
) -> [CoreResult<()>; 2] {
    let barrier = Arc::new(Barrier::new(2));
    let spawn = |a: Arc<DocumentCollection>, b: Arc<DocumentCollection>| {
        let db = Arc::clone(&db);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            let trx = db.begin();
            let held = trx.lock_collection(&a, LockMode::Write, timeout);
            barrier.wait();
            held?;
            trx.lock_collection(&b, LockMode::Write, timeout)
        })
    };

    let left = spawn(Arc::clone(&first), Arc::clone(&second));
    let right = spawn(second, first);
    [
        left.join().expect("Thread panicked"),
        right.join().expect("Thread panicked"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestDatabase;

    #[test]
    fn sequential_writes_all_succeed() {
        let test_db = TestDatabase::memory();
        let collection = test_db.documents("stress");
        let config = StressConfig {
            operations: 300,
            ..StressConfig::default()
        };
        let result = stress_sequential_writes(&test_db, &collection, &config);
        assert_eq!(result.successful_ops, 300);
        assert_eq!(collection.document_count(), 300);
    }

    #[test]
    fn mixed_operations_keep_count_consistent() {
        let test_db = TestDatabase::memory();
        let collection = test_db.documents("stress");
        let config = StressConfig {
            operations: 300,
            key_count: 10,
            ..StressConfig::default()
        };
        let result = stress_mixed_operations(&test_db, &collection, &config);
        assert_eq!(result.total_ops, 300);
        let trx = test_db.begin();
        assert_eq!(collection.keys(&trx).unwrap().len() as u64, collection.document_count());
    }
}
