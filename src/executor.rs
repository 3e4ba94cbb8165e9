use std::future::Future;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Run `op` over every item with at most `limit` operations in flight,
/// returning results in input order regardless of completion order.
///
/// A failed item does not cancel the in-flight remainder; the first error
/// (by input order) is propagated once everything has settled. Callers that
/// need per-item failure isolation wrap `op` so it returns `Ok` per item.
/// `limit = 1` degenerates to strict sequential execution.
pub async fn map_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, op: F) -> Result<Vec<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let total = items.len();

    let mut join_set = JoinSet::new();
    for (index, item) in items.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let op = op.clone();
        join_set.spawn(async move {
            // The semaphore is only closed when the set itself is dropped
            let result = match semaphore.acquire_owned().await {
                Ok(_permit) => op(item).await,
                Err(err) => Err(anyhow!("executor semaphore closed: {err}")),
            };
            (index, result)
        });
    }

    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);
    let mut first_error: Option<(usize, anyhow::Error)> = None;

    while let Some(joined) = join_set.join_next().await {
        let (index, result) = joined.map_err(|err| anyhow!("executor task panicked: {err}"))?;
        match result {
            Ok(value) => slots[index] = Some(value),
            Err(err) => {
                if first_error.as_ref().map_or(true, |(i, _)| index < *i) {
                    first_error = Some((index, err));
                }
            }
        }
    }

    if let Some((index, err)) = first_error {
        return Err(err.context(format!("item {index} failed")));
    }

    slots
        .into_iter()
        .map(|slot| slot.ok_or_else(|| anyhow!("executor produced no result for an item")))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::{sleep, Duration};

    #[tokio::test(start_paused = true)]
    async fn preserves_input_order_under_reversed_latency() {
        let items = vec![("a", 40u64), ("b", 30), ("c", 20), ("d", 10)];
        let results = map_bounded(items, 4, |(name, delay_ms)| async move {
            sleep(Duration::from_millis(delay_ms)).await;
            Ok(name)
        })
        .await
        .unwrap();

        assert_eq!(results, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test(start_paused = true)]
    async fn never_exceeds_the_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<u64> = (0..16).collect();
        let in_flight_outer = Arc::clone(&in_flight);
        let peak_outer = Arc::clone(&peak);
        let results = map_bounded(items, 3, move |n| {
            let in_flight = Arc::clone(&in_flight_outer);
            let peak = Arc::clone(&peak_outer);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n * 2)
            }
        })
        .await
        .unwrap();

        assert_eq!(results.len(), 16);
        assert_eq!(results[7], 14);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn propagates_the_earliest_failure_after_settling() {
        let completed = Arc::new(AtomicUsize::new(0));
        let completed_outer = Arc::clone(&completed);

        let items: Vec<usize> = (0..5).collect();
        let err = map_bounded(items, 2, move |n| {
            let completed = Arc::clone(&completed_outer);
            async move {
                sleep(Duration::from_millis(n as u64)).await;
                if n == 1 || n == 3 {
                    anyhow::bail!("boom {n}");
                }
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await
        .unwrap_err();

        // Earliest failing index wins, and the healthy items all ran.
        assert!(format!("{err:#}").contains("item 1"));
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn limit_one_runs_strictly_sequentially() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let in_flight_outer = Arc::clone(&in_flight);
        let results = map_bounded(vec![1, 2, 3], 1, move |n| {
            let in_flight = Arc::clone(&in_flight_outer);
            async move {
                assert_eq!(in_flight.fetch_add(1, Ordering::SeqCst), 0);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n)
            }
        })
        .await
        .unwrap();

        assert_eq!(results, vec![1, 2, 3]);
    }
}
