use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Split `items` into consecutive chunks of at most `len` elements.
pub fn chunk<T>(items: Vec<T>, len: usize) -> Vec<Vec<T>> {
    let len = len.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(len));
    let mut iter = items.into_iter();
    loop {
        let next: Vec<T> = iter.by_ref().take(len).collect();
        if next.is_empty() {
            break;
        }
        chunks.push(next);
    }
    chunks
}

/// Partition `items` into chunks of `chunk_len` and run `f` over every chunk
/// with at most `max_concurrent` in flight. Results come back in chunk order.
pub async fn bounded_parallel_map<T, R, F, Fut>(
    items: Vec<T>,
    chunk_len: usize,
    max_concurrent: usize,
    f: F,
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    map_chunks(chunk(items, chunk_len), max_concurrent, f).await
}

/// Like [`bounded_parallel_map`] for callers that already packed their chunks.
///
/// A worker panic is re-raised on the caller; there is no partial result.
pub async fn map_chunks<T, R, F, Fut>(chunks: Vec<Vec<T>>, max_concurrent: usize, f: F) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, Vec<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = chunks.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
    let f = Arc::new(f);
    let mut workers = JoinSet::new();

    for (index, chunk) in chunks.into_iter().enumerate() {
        // The semaphore is never closed, so acquisition only waits.
        let permit = semaphore.clone().acquire_owned().await.ok();
        let f = f.clone();
        workers.spawn(async move {
            let out = f(index, chunk).await;
            drop(permit);
            (index, out)
        });
    }

    let mut results = Vec::with_capacity(total);
    while let Some(joined) = workers.join_next().await {
        match joined {
            Ok(done) => results.push(done),
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => tracing::error!(error = %e, "[MULTICALL] worker cancelled"),
        }
    }
    results.sort_by_key(|(index, _)| *index);
    results.into_iter().map(|(_, out)| out).collect()
}
