use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::vec;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::error::{MigrateError, Result};

/// What a pool run produced once every worker has finished.
#[derive(Debug)]
pub(crate) struct Collected<R> {
    /// Results of the items that succeeded, in completion order.
    pub results: Vec<R>,
    /// Items whose task failed.
    pub failed: usize,
    /// Earliest failure observed.
    pub first_error: Option<MigrateError>,
}

/// Runs `task` over `items` on at most `workers` concurrent tokio tasks and
/// waits for all of them.
///
/// A failing item does not stop the others: every queued item is attempted,
/// the first error is kept and the rest are only counted.
pub(crate) async fn run_bounded<T, R, F, Fut>(items: Vec<T>, workers: usize, task: F) -> Collected<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let workers = workers.max(1).min(items.len().max(1));
    let queue: Arc<Mutex<vec::IntoIter<T>>> = Arc::new(Mutex::new(items.into_iter()));
    let results: Arc<Mutex<Vec<R>>> = Arc::new(Mutex::new(Vec::new()));
    let first_error: Arc<Mutex<Option<MigrateError>>> = Arc::new(Mutex::new(None));
    let failed = Arc::new(AtomicUsize::new(0));
    let task = Arc::new(task);

    let mut set = JoinSet::new();
    for _ in 0..workers {
        let queue = Arc::clone(&queue);
        let results = Arc::clone(&results);
        let first_error = Arc::clone(&first_error);
        let failed = Arc::clone(&failed);
        let task = Arc::clone(&task);
        set.spawn(async move {
            loop {
                let next = queue.lock().next();
                let Some(item) = next else { break };
                match task(item).await {
                    Ok(result) => results.lock().push(result),
                    Err(err) => {
                        failed.fetch_add(1, Ordering::SeqCst);
                        first_error.lock().get_or_insert(err);
                    }
                }
            }
        });
    }

    while let Some(joined) = set.join_next().await {
        if let Err(join) = joined {
            failed.fetch_add(1, Ordering::SeqCst);
            first_error
                .lock()
                .get_or_insert(MigrateError::Worker(join.to_string()));
        }
    }

    let results = std::mem::take(&mut *results.lock());
    let first_error = first_error.lock().take();
    Collected {
        results,
        failed: failed.load(Ordering::SeqCst),
        first_error,
    }
}
