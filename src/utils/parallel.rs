use std::sync::atomic::{AtomicUsize, Ordering};
use rayon::prelude::*;
use rayon::ThreadPool;
use crate::Result;

pub trait ParallelProcessor {
    /// A dedicated pool, so the global one keeps its own size.
    fn build_pool(num_threads: usize) -> Result<ThreadPool> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|index| format!("collector-{}", index))
            .build()?;
        log::debug!("Using {} worker threads", pool.current_num_threads());
        Ok(pool)
    }

    fn get_progress_counter() -> AtomicUsize {
        AtomicUsize::new(0)
    }

    fn tick_progress(progress: &AtomicUsize, total: usize, label: &str) {
        let processed = progress.fetch_add(1, Ordering::SeqCst) + 1;
        if processed % 100 == 0 || processed == total {
            log::info!(
                "{}: {}/{} ({:.1}%)",
                label,
                processed,
                total,
                (processed as f64 / total as f64) * 100.0
            );
        }
    }

    /// Runs `f` over every item on `pool`. Output order follows input order.
    fn parallel_map<T, R, F>(pool: &ThreadPool, items: &[T], f: F) -> Vec<R>
    where
        T: Sync,
        R: Send,
        F: Fn(&T) -> R + Send + Sync,
    {
        pool.install(|| items.par_iter().map(|item| f(item)).collect())
    }
}
