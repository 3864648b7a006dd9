use std::fmt;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::AuthenticError;

use super::CredentialSource;

type Outcome<T> = Result<T, AuthenticError>;

/// Bound the time spent in a backing fetch.
///
/// The fetch runs on its own thread. If it has not finished within the timeout the caller gets
/// [`AuthenticError::Timeout`], which is a transient failure: a [`super::MemoizedCredential`]
/// wrapping this source fetches again on the next access.
///
/// At most one fetch runs at a time. A fetch that timed out keeps running, and later calls wait
/// on it, again bounded by the timeout, instead of starting another one. When it finally
/// finishes, the next call takes its result.
pub struct TimeoutSource<S: CredentialSource> {
    source: Arc<S>,
    timeout: Duration,
    pending: Mutex<Option<mpsc::Receiver<Outcome<S::Credentials>>>>,
}

impl<S: CredentialSource> TimeoutSource<S> {
    pub fn new(source: S, timeout: Duration) -> Self {
        Self {
            source: Arc::new(source),
            timeout,
            pending: Mutex::new(None),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether a fetch that timed out is still running.
    pub fn is_pending(&self) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .is_some()
    }
}

impl<S> CredentialSource for TimeoutSource<S>
where
    S: CredentialSource + Send + Sync + 'static,
    S::Credentials: Send + 'static,
{
    type Credentials = S::Credentials;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError> {
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());

        let rx = match pending.take() {
            Some(rx) => {
                tracing::debug!("waiting on credential fetch that timed out earlier");
                rx
            }
            None => {
                let (tx, rx) = mpsc::sync_channel(1);
                let source = self.source.clone();
                std::thread::Builder::new()
                    .name("credential-fetch".to_owned())
                    .spawn(move || {
                        // The receiver is gone if the source was dropped meanwhile.
                        let _ = tx.send(source.fetch());
                    })
                    .map_err(AuthenticError::fetch)?;
                rx
            }
        };

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                tracing::debug!(timeout = ?self.timeout, "credential fetch timed out");
                *pending = Some(rx);
                Err(AuthenticError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(AuthenticError::Other("credential fetch panicked".to_owned()))
            }
        }
    }
}

impl<S: CredentialSource + fmt::Debug> fmt::Debug for TimeoutSource<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutSource")
            .field("source", &self.source)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
