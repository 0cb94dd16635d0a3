use rayon::prelude::*;

/// Map a read-only closure over restraints, optionally in parallel.
///
/// When `sequential` is true the restraints are visited on the current thread
/// (no rayon overhead, best when the host already saturates the cores, or
/// when the host calls from inside its own thread pool).
///
/// Only for read-only work: anything that may issue an ensemble collective
/// must run in a fixed order on one thread.
pub fn par_map<T, R>(items: &[T], sequential: bool, body: impl Fn(&T) -> R + Send + Sync) -> Vec<R>
where
    T: Sync,
    R: Send,
{
    if sequential {
        items.iter().map(body).collect()
    } else {
        items.par_iter().map(body).collect()
    }
}
