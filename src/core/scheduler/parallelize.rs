//! Bounded worker pool over independent pieces of work, used to evaluate nodes in parallel.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

/// Runs `work(i)` for every `i` in `0..pieces` on up to `workers` threads and returns the
/// results in index order.
///
/// Workers pull indices from a shared counter. The first error raises an abort flag: workers
/// stop pulling new indices but finish the piece they are on, and that first error is
/// returned.
pub fn parallelize<T, E, F>(workers: usize, pieces: usize, work: F) -> Result<Vec<T>, E>
where
    T: Send,
    E: Send,
    F: Fn(usize) -> Result<T, E> + Sync,
{
    if pieces == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, pieces);
    if workers == 1 {
        return (0..pieces).map(work).collect();
    }

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let first_error: Mutex<Option<E>> = Mutex::new(None);

    let per_worker: Vec<Vec<(usize, T)>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    while !abort.load(Ordering::Acquire) {
                        let idx = next.fetch_add(1, Ordering::Relaxed);
                        if idx >= pieces {
                            break;
                        }
                        match work(idx) {
                            Ok(result) => done.push((idx, result)),
                            Err(err) => {
                                let mut first = first_error.lock();
                                if first.is_none() {
                                    *first = Some(err);
                                }
                                abort.store(true, Ordering::Release);
                                break;
                            }
                        }
                    }
                    done
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| match handle.join() {
                Ok(done) => done,
                Err(panic) => std::panic::resume_unwind(panic),
            })
            .collect()
    });

    if let Some(err) = first_error.into_inner() {
        return Err(err);
    }

    let mut slots: Vec<Option<T>> = (0..pieces).map(|_| None).collect();
    for (idx, result) in per_worker.into_iter().flatten() {
        slots[idx] = Some(result);
    }
    // Without an abort every index was pulled exactly once.
    Ok(slots.into_iter().flatten().collect())
}
