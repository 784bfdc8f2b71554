//! Cooperative cancellation for in-flight fetches.

use crate::error::ProviderError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Owner side of an abort signal.
#[derive(Clone)]
pub struct AbortController {
    sender: Arc<watch::Sender<Option<String>>>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Signal to hand to fetch parameters.
    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            receiver: self.sender.subscribe(),
        }
    }

    /// Abort with `reason`. Later calls keep the first reason.
    pub fn abort(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
    }
}

/// Observer side of an [`AbortController`].
#[derive(Clone)]
pub struct AbortSignal {
    receiver: watch::Receiver<Option<String>>,
}

impl fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortSignal")
            .field("reason", &self.reason())
            .finish()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.receiver.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.receiver.borrow().clone()
    }

    /// Resolve with the abort reason once aborted.
    ///
    /// Never resolves if the controller is dropped without aborting.
    pub async fn aborted(&self) -> String {
        let mut receiver = self.receiver.clone();
        let reason = match receiver.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone(),
            Err(_) => None,
        };
        match reason {
            Some(reason) => reason,
            None => std::future::pending().await,
        }
    }

    /// Fail fast when already aborted.
    ///
    /// # Errors
    /// Returns [`ProviderError::Aborted`] with the abort reason.
    pub fn check(&self) -> Result<(), ProviderError> {
        match self.reason() {
            Some(reason) => Err(ProviderError::Aborted(reason)),
            None => Ok(()),
        }
    }
}

/// Run `future` unless `signal` aborts first.
///
/// An already-aborted signal rejects before `future` is polled, so no
/// partial work happens past the check.
///
/// # Errors
/// Returns [`ProviderError::Aborted`] on abort, otherwise whatever `future`
/// returns.
pub async fn abortable<T, F>(signal: Option<&AbortSignal>, future: F) -> Result<T, ProviderError>
where
    F: Future<Output = Result<T, ProviderError>>,
{
    let Some(signal) = signal else {
        return future.await;
    };
    signal.check()?;
    tokio::select! {
        biased;
        reason = signal.aborted() => Err(ProviderError::Aborted(reason)),
        result = future => result,
    }
}
