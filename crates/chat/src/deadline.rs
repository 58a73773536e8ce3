use std::future::Future;
use std::time::Duration;

/// Awaits `future`, giving up after `limit` when one is set.
///
/// Returns `None` on expiry; the future is dropped, which aborts any request it owns.
pub(crate) async fn within<F>(limit: Option<Duration>, future: F) -> Option<F::Output>
where
    F: Future,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, future).await.ok(),
        None => Some(future.await),
    }
}
