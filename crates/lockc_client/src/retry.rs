use std::fmt::Display;
use std::thread;
use std::time::Duration;

use log::warn;

/// Doubling delays starting at `base`, capped at `max_delay`. The iterator
/// never ends; bound it with `take` where a retry budget applies.
pub(crate) fn exponential_backoff(
    base: Duration,
    max_delay: Duration,
) -> impl Iterator<Item = Duration> {
    std::iter::successors(Some(base), move |delay| {
        Some((*delay * 2).min(max_delay))
    })
}

/// Runs `op` until it succeeds or the backoff schedule is exhausted,
/// sleeping between attempts. The final error is returned as-is.
pub(crate) fn retry_blocking<T, E: Display>(
    backoff: impl IntoIterator<Item = Duration>,
    what: &str,
    mut op: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut delays = backoff.into_iter();
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(e) => match delays.next() {
                Some(delay) => {
                    warn!("{what} failed, retrying in {delay:?}: {e}");
                    thread::sleep(delay);
                }
                None => return Err(e),
            },
        }
    }
}
