/// Deferred, shareable output values
use std::fmt;
use std::future::Future;

use futures::future::{BoxFuture, FutureExt, Shared};

use super::error::OutputError;

/// The settled state of an output
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved<T> {
    Known(T),
    /// The value will only exist after a real update (preview runs)
    Unknown,
}

type SharedResult<T> = Shared<BoxFuture<'static, Result<Resolved<T>, OutputError>>>;

/// A value that becomes available once its predecessor resolves.
///
/// Outputs are lazy: nothing runs until the output (or one of its
/// dependents) is resolved. Clones share a single computation, so an
/// applied function runs at most once no matter how many consumers await it.
pub struct Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    inner: SharedResult<T>,
}

impl<T> Clone for Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Output<T>
where
    T: Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.peek() {
            Some(value) => f.debug_tuple("Output").field(value).finish(),
            None => f.write_str("Output(<pending>)"),
        }
    }
}

impl<T> Output<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Wrap a future that produces the output's state
    pub fn from_future<F>(future: F) -> Self
    where
        F: Future<Output = Result<Resolved<T>, OutputError>> + Send + 'static,
    {
        Self {
            inner: future.boxed().shared(),
        }
    }

    pub fn known(value: T) -> Self {
        Self::from_future(futures::future::ready(Ok(Resolved::Known(value))))
    }

    pub fn unknown() -> Self {
        Self::from_future(futures::future::ready(Ok(Resolved::Unknown)))
    }

    #[allow(dead_code)]
    pub fn failed(error: OutputError) -> Self {
        Self::from_future(futures::future::ready(Err(error)))
    }

    /// Wait for the output to settle
    pub async fn resolve(&self) -> Result<Resolved<T>, OutputError> {
        self.inner.clone().await
    }

    /// Derive a new output from this one.
    ///
    /// `f` runs only once this output resolves to a known value. Unknown
    /// values and failures pass through without calling `f`.
    pub fn apply<U, F, Fut>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Fut + Send + 'static,
        Fut: Future<Output = Result<U, OutputError>> + Send + 'static,
    {
        let upstream = self.inner.clone();
        Output::from_future(async move {
            match upstream.await? {
                Resolved::Known(value) => f(value).await.map(Resolved::Known),
                Resolved::Unknown => Ok(Resolved::Unknown),
            }
        })
    }

    /// Synchronous variant of [`Output::apply`]
    pub fn map<U, F>(&self, f: F) -> Output<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Result<U, OutputError> + Send + 'static,
    {
        self.apply(move |value| futures::future::ready(f(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::sync::oneshot;

    fn deferred() -> (oneshot::Sender<String>, Output<String>) {
        let (tx, rx) = oneshot::channel::<String>();
        let output = Output::from_future(async move {
            rx.await
                .map(Resolved::Known)
                .map_err(|_| OutputError::Command {
                    command: "orb info".to_string(),
                    reason: "sender dropped".to_string(),
                })
        });
        (tx, output)
    }

    #[tokio::test]
    async fn test_apply_waits_for_predecessor() {
        let calls = Arc::new(AtomicU32::new(0));
        let (tx, id) = deferred();

        let counter = calls.clone();
        let derived = id.apply(move |id| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, OutputError>(format!("config for {}", id))
        });

        // Polling the dependent before the id exists must not run the function
        assert!(derived.resolve().now_or_never().is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        tx.send("demo".to_string()).unwrap();
        let value = derived.resolve().await.unwrap();
        assert_eq!(value, Resolved::Known("config for demo".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_apply_runs_once_for_all_clones() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let derived = Output::known(2_i64).map(move |n| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(n * 21)
        });

        let other = derived.clone();
        assert_eq!(derived.resolve().await.unwrap(), Resolved::Known(42));
        assert_eq!(other.resolve().await.unwrap(), Resolved::Known(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_skips_apply() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let derived = Output::<String>::unknown().map(move |s| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(s)
        });

        assert_eq!(derived.resolve().await.unwrap(), Resolved::Unknown);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_propagates_to_dependents() {
        let error = OutputError::MalformedKubeconfig("empty output".to_string());
        let failed = Output::<String>::failed(error.clone());
        let derived = failed.map(|s| Ok(s.len()));

        let err = derived.resolve().await.unwrap_err();
        assert_eq!(err, error);
    }

    #[test]
    fn test_resolve_with_block_on() {
        let output = Output::known("id".to_string());
        let value = tokio_test::block_on(output.resolve()).unwrap();
        assert_eq!(value, Resolved::Known("id".to_string()));
    }
}
