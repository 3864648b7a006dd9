use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwapOption;

use crate::clock::{Clock, SystemClock};
use crate::{AuthenticError, AuthorizationError};

use super::CredentialSource;

/// Default time a fetched credential is reused for.
pub const DEFAULT_SESSION_INTERVAL: Duration = Duration::from_secs(60);

/// Shared record of the last fatal authorization failure.
///
/// While the slot holds an error, every cache using it returns that error without calling its
/// backing fetch, however long ago the failure happened. Only [`AuthorizationSlot::clear`], a
/// successful fetch, or [`MemoizedCredential::reset`] empties it.
///
/// Clones share the same slot, so one slot can cover several caches belonging to the same
/// provider context.
#[derive(Clone, Default)]
pub struct AuthorizationSlot {
    inner: Arc<ArcSwapOption<AuthorizationError>>,
}

impl AuthorizationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<AuthorizationError> {
        self.inner.load_full().map(|err| (*err).clone())
    }

    pub fn is_set(&self) -> bool {
        self.inner.load().is_some()
    }

    pub fn set(&self, error: AuthorizationError) {
        self.inner.store(Some(Arc::new(error)));
    }

    pub fn clear(&self) {
        self.inner.store(None);
    }
}

impl fmt::Debug for AuthorizationSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthorizationSlot")
            .field(&self.inner.load_full())
            .finish()
    }
}

struct Memoized<T> {
    value: Arc<T>,
    fetched_at: Instant,
}

// State owned by whoever is fetching. Holding the mutex is what makes a caller the single
// fetcher.
struct Flight<T> {
    // Outcome of the latest fetch, handed to callers that queued while it ran.
    last: Option<Result<Arc<T>, AuthenticError>>,
}

impl<T> Default for Flight<T> {
    fn default() -> Self {
        Self { last: None }
    }
}

/// Credentials fetched at most once per session interval.
///
/// - Reads of a still-valid value only load an `ArcSwap` and never block.
/// - When the value is missing or stale, one caller runs the backing fetch while the others
///   wait for it and share its outcome, whether that is a value or an error. This holds even
///   when the value has already expired by the time a waiter wakes up.
/// - A fatal [`AuthorizationError`] from the fetch is stored in the [`AuthorizationSlot`] and
///   returned to every later caller without fetching again, even after the session interval
///   has passed.
/// - Any other failure is returned to the callers waiting on that fetch only. The next access
///   fetches again.
pub struct MemoizedCredential<S, C = SystemClock>
where
    S: CredentialSource,
{
    source: S,
    current: ArcSwapOption<Memoized<S::Credentials>>,
    flight: Mutex<Flight<S::Credentials>>,
    // Number of fetches completed, successful or not. Lets a waiter tell whether a fetch
    // finished while it was queued on `flight`.
    completed: AtomicU64,
    authorization: AuthorizationSlot,
    expiration: Duration,
    clock: C,
}

impl<S: CredentialSource> MemoizedCredential<S, SystemClock> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            current: ArcSwapOption::from(None),
            flight: Mutex::new(Flight::default()),
            completed: AtomicU64::new(0),
            authorization: AuthorizationSlot::new(),
            expiration: DEFAULT_SESSION_INTERVAL,
            clock: SystemClock,
        }
    }
}

impl<S: CredentialSource, C> MemoizedCredential<S, C> {
    /// Set how long a fetched value is reused before fetching again.
    #[must_use]
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Share an authorization slot with other caches in the same provider context.
    #[must_use]
    pub fn with_authorization_slot(mut self, slot: AuthorizationSlot) -> Self {
        self.authorization = slot;
        self
    }

    /// Measure expiration with a different clock.
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> MemoizedCredential<S, D> {
        MemoizedCredential {
            source: self.source,
            current: self.current,
            flight: self.flight,
            completed: self.completed,
            authorization: self.authorization,
            expiration: self.expiration,
            clock,
        }
    }

    pub fn expiration(&self) -> Duration {
        self.expiration
    }

    pub fn authorization_slot(&self) -> &AuthorizationSlot {
        &self.authorization
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Drop the cached value unless it has already been replaced.
    ///
    /// `used` is the value the caller found to be rejected. If another caller already fetched a
    /// newer value, that value is kept. Returns whether the cached value was dropped.
    pub fn invalidate(&self, used: &Arc<S::Credentials>) -> bool {
        let mut flight = self.lock_flight();
        let guard = self.current.load();
        let is_current = match &*guard {
            Some(memoized) => Arc::ptr_eq(&memoized.value, used),
            None => false,
        };
        drop(guard);
        if is_current {
            tracing::debug!("invalidating cached credentials");
            self.current.store(None);
            flight.last = None;
        }
        is_current
    }

    /// Drop the cached value unconditionally. The next access fetches.
    pub fn invalidate_all(&self) {
        let mut flight = self.lock_flight();
        flight.last = None;
        self.current.store(None);
    }

    /// Forget both the cached value and any recorded authorization failure.
    ///
    /// Call this after the underlying identity or secret has been changed.
    pub fn reset(&self) {
        let mut flight = self.lock_flight();
        flight.last = None;
        self.current.store(None);
        self.authorization.clear();
    }

    fn lock_flight(&self) -> MutexGuard<'_, Flight<S::Credentials>> {
        // A fetch that panicked leaves no partial state behind, so the guard is still usable.
        self.flight
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl<S, C> MemoizedCredential<S, C>
where
    S: CredentialSource,
    C: Clock,
{
    /// Get the current credentials, fetching them if needed.
    pub fn get(&self) -> Result<Arc<S::Credentials>, AuthenticError> {
        if let Some(err) = self.authorization.get() {
            tracing::warn!(error = %err, "not fetching credentials after authorization failure");
            return Err(err.into());
        }
        if let Some(value) = self.fresh() {
            tracing::trace!("using cached credentials");
            return Ok(value);
        }

        let seen = self.completed.load(Ordering::Acquire);
        let mut flight = self.lock_flight();

        // Whoever held the lock before us may have settled things already.
        if let Some(err) = self.authorization.get() {
            return Err(err.into());
        }
        if let Some(value) = self.fresh() {
            tracing::trace!("using credentials fetched by another caller");
            return Ok(value);
        }
        if self.completed.load(Ordering::Acquire) != seen {
            if let Some(outcome) = &flight.last {
                tracing::trace!("sharing outcome of the fetch that completed while waiting");
                return outcome.clone();
            }
        }

        tracing::debug!(expiration = ?self.expiration, "fetching credentials");
        let result = match self.source.fetch() {
            Ok(credentials) => {
                let value = Arc::new(credentials);
                self.current.store(Some(Arc::new(Memoized {
                    value: value.clone(),
                    fetched_at: self.clock.now(),
                })));
                self.authorization.clear();
                Ok(value)
            }
            Err(err) => {
                match err.authorization() {
                    Some(authorization) if !authorization.is_renewable() => {
                        tracing::warn!(error = %authorization, "credential fetch was refused");
                        self.authorization.set(authorization.clone());
                    }
                    _ => {
                        tracing::debug!(error = %err, "credential fetch failed");
                    }
                }
                Err(err)
            }
        };
        flight.last = Some(result.clone());
        self.completed.fetch_add(1, Ordering::Release);
        result
    }

    fn fresh(&self) -> Option<Arc<S::Credentials>> {
        let guard = self.current.load();
        let memoized = (*guard).as_ref()?;
        if self.clock.now().saturating_duration_since(memoized.fetched_at) < self.expiration {
            Some(memoized.value.clone())
        } else {
            None
        }
    }
}

impl<S, C> CredentialSource for MemoizedCredential<S, C>
where
    S: CredentialSource,
    C: Clock,
{
    type Credentials = Arc<S::Credentials>;

    fn fetch(&self) -> Result<Self::Credentials, AuthenticError> {
        self.get()
    }
}

impl<S, C> fmt::Debug for MemoizedCredential<S, C>
where
    S: CredentialSource + fmt::Debug,
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoizedCredential")
            .field("source", &self.source)
            .field("cached", &self.current.load().is_some())
            .field("authorization", &self.authorization)
            .field("expiration", &self.expiration)
            .field("clock", &self.clock)
            .finish()
    }
}
