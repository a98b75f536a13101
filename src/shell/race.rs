//! First-of-N race over cancellable futures.

use futures::future::{BoxFuture, select_all};

/// Run all `contenders` concurrently and resolve with the first to finish.
///
/// Returns the winner's output and its index in `contenders`, or `None` when
/// there is nothing to race. Every losing future is dropped, and therefore
/// cancelled, before this returns.
pub async fn first_completed<'a, T>(contenders: Vec<BoxFuture<'a, T>>) -> Option<(T, usize)> {
    if contenders.is_empty() {
        return None;
    }
    let (output, index, losers) = select_all(contenders).await;
    drop(losers);
    Some((output, index))
}
