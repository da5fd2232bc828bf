#[inline]
pub fn spawn<O, F>(future: F) -> tokio::task::JoinHandle<O>
where
    O: Send + 'static,
    F: std::future::Future<Output = O> + Send + 'static,
{
    tokio::spawn(future)
}

/// Runs blocking work (host kernels, device polling) off the async workers.
#[inline]
pub fn spawn_blocking<O, F>(f: F) -> tokio::task::JoinHandle<O>
where
    O: Send + 'static,
    F: FnOnce() -> O + Send + 'static,
{
    tokio::task::spawn_blocking(f)
}

pub type BoxFuture<'a, T> = futures::future::BoxFuture<'a, T>;
