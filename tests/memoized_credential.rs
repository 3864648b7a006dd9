use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use renewal::credential::{from_fn, CredentialSource, MemoizedCredential, TimeoutSource};
use renewal::{AuthenticError, AuthorizationError, FailureClass, ManualClock};

type TestResult = Result<(), Box<dyn std::error::Error + Send + Sync + 'static>>;

#[derive(Debug, thiserror::Error)]
#[error("remote call failed")]
struct RemoteCallFailed(#[source] AuthorizationError);

/// Values 10, 20, 30, ... one per fetch.
fn counting_source(calls: &Arc<AtomicUsize>) -> impl CredentialSource<Credentials = usize> {
    let calls = calls.clone();
    from_fn(move || Ok::<_, AuthenticError>((calls.fetch_add(1, Ordering::SeqCst) + 1) * 10))
}

/// With a 75ms session interval, a read at 150ms fetches once more and a read at 160ms
/// reuses that value.
#[test]
fn test_expiration_refetches_once() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let cache = MemoizedCredential::new(counting_source(&calls))
        .with_expiration(Duration::from_millis(75));

    assert_eq!(*cache.get()?, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(*cache.get()?, 10);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    thread::sleep(Duration::from_millis(140));
    assert_eq!(*cache.get()?, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    thread::sleep(Duration::from_millis(10));
    assert_eq!(*cache.get()?, 20);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    Ok(())
}

/// Same timeline as above on a manual clock.
#[test]
fn test_expiration_with_manual_clock() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let clock = ManualClock::new();
    let cache = MemoizedCredential::new(counting_source(&calls))
        .with_expiration(Duration::from_millis(75))
        .with_clock(clock.clone());

    let mut seen = Vec::new();
    for step in [0, 10, 140, 10] {
        clock.advance(Duration::from_millis(step));
        seen.push((*cache.get()?, calls.load(Ordering::SeqCst)));
    }

    assert_eq!(seen, [(10, 1), (10, 1), (20, 2), (20, 2)]);
    Ok(())
}

#[test]
fn test_concurrent_first_callers_share_one_fetch() -> TestResult {
    const CALLERS: usize = 16;

    let calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = calls.clone();
    let cache = Arc::new(MemoizedCredential::new(from_fn(move || {
        slow_calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        Ok::<_, AuthenticError>(String::from("token"))
    })));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get()
            })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.join().map_err(|_| "caller panicked")??);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));
    Ok(())
}

/// Waiters get the value fetched on their behalf even if it expires before they wake up.
#[test]
fn test_concurrent_callers_share_one_fetch_with_zero_expiration() -> TestResult {
    const CALLERS: usize = 8;

    let calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = calls.clone();
    let cache = Arc::new(
        MemoizedCredential::new(from_fn(move || {
            let n = slow_calls.fetch_add(1, Ordering::SeqCst) + 1;
            thread::sleep(Duration::from_millis(100));
            Ok::<_, AuthenticError>(format!("token-{n}"))
        }))
        .with_expiration(Duration::ZERO),
    );
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get()
            })
        })
        .collect();

    let mut values = Vec::new();
    for handle in handles {
        values.push(handle.join().map_err(|_| "caller panicked")??);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.iter().all(|value| Arc::ptr_eq(value, &values[0])));

    // Nothing is cached, so a later caller fetches again.
    assert_eq!(*cache.get()?, "token-2");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn test_concurrent_callers_share_one_failure() -> TestResult {
    const CALLERS: usize = 8;

    let calls = Arc::new(AtomicUsize::new(0));
    let slow_calls = calls.clone();
    let cache = Arc::new(MemoizedCredential::new(from_fn(move || {
        slow_calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(200));
        Err::<String, _>(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "identity service reset the connection",
        ))
    })));
    let barrier = Arc::new(Barrier::new(CALLERS));

    let handles: Vec<_> = (0..CALLERS)
        .map(|_| {
            let cache = cache.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                cache.get().map(|_| ()).map_err(|err| err.to_string())
            })
        })
        .collect();

    let mut errors = Vec::new();
    for handle in handles {
        errors.push(handle.join().map_err(|_| "caller panicked")?.unwrap_err());
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(errors.iter().all(|error| error == &errors[0]));
    assert!(errors[0].contains("reset the connection"));
    Ok(())
}

#[test]
fn test_authorization_failure_is_sticky() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch_calls = calls.clone();
    let clock = ManualClock::new();
    let cache = MemoizedCredential::new(from_fn(move || {
        fetch_calls.fetch_add(1, Ordering::SeqCst);
        Err::<String, _>(AuthenticError::from(AuthorizationError::fatal(
            "The request you have made requires authentication.",
        )))
    }))
    .with_expiration(Duration::from_millis(75))
    .with_clock(clock.clone());

    let first = cache.get().unwrap_err();
    assert_eq!(first.class(), FailureClass::FatalAuth);

    for _ in 0..3 {
        clock.advance(Duration::from_secs(3600));
        let again = cache.get().unwrap_err();
        assert_eq!(again.authorization(), first.authorization());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    cache.authorization_slot().clear();
    assert!(cache.get().is_err());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

/// An authorization failure wrapped in another error still poisons the cache.
#[test]
fn test_nested_authorization_failure_is_sticky() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch_calls = calls.clone();
    let cache = MemoizedCredential::new(from_fn(move || {
        fetch_calls.fetch_add(1, Ordering::SeqCst);
        Err::<String, _>(RemoteCallFailed(AuthorizationError::fatal("bad identity")))
    }));

    assert_eq!(cache.get().unwrap_err().class(), FailureClass::FatalAuth);
    assert_eq!(cache.get().unwrap_err().class(), FailureClass::FatalAuth);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(cache.authorization_slot().is_set());
    Ok(())
}

#[test]
fn test_transient_failure_is_not_sticky() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch_calls = calls.clone();
    let cache = MemoizedCredential::new(from_fn(move || {
        match fetch_calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(AuthenticError::Other("identity service unavailable".to_owned())),
            _ => Ok("token"),
        }
    }));

    assert_eq!(cache.get().unwrap_err().class(), FailureClass::Transient);
    assert_eq!(*cache.get()?, "token");

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(!cache.authorization_slot().is_set());
    Ok(())
}

#[test]
fn test_shared_slot_poisons_every_cache() -> TestResult {
    let refusing = MemoizedCredential::new(from_fn(|| {
        Err::<&str, _>(AuthenticError::from(AuthorizationError::fatal("account suspended")))
    }));
    let healthy = MemoizedCredential::new(from_fn(|| Ok::<_, AuthenticError>("catalog")))
        .with_authorization_slot(refusing.authorization_slot().clone());

    assert!(refusing.get().is_err());

    let err = healthy.get().unwrap_err();
    assert_eq!(
        err.authorization().map(|failure| failure.message()),
        Some("account suspended")
    );
    Ok(())
}

#[test]
fn test_fetch_timeout_is_transient() -> TestResult {
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch_calls = calls.clone();
    let source = from_fn(move || {
        if fetch_calls.fetch_add(1, Ordering::SeqCst) == 0 {
            thread::sleep(Duration::from_millis(300));
        }
        Ok::<_, AuthenticError>("token")
    });
    let cache = MemoizedCredential::new(TimeoutSource::new(source, Duration::from_millis(50)));

    let err = cache.get().unwrap_err();
    assert!(matches!(err, AuthenticError::Timeout(_)));
    assert!(!cache.authorization_slot().is_set());
    assert!(cache.source().is_pending());

    // The slow fetch finishes in the background and the next access takes its result.
    thread::sleep(Duration::from_millis(400));
    assert_eq!(*cache.get()?, "token");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!cache.source().is_pending());

    cache.invalidate_all();
    assert_eq!(*cache.get()?, "token");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

/// Repeated timeouts against a hung identity service keep a single fetch running.
#[test]
fn test_repeated_timeouts_share_one_fetch() -> TestResult {
    let started = Arc::new(AtomicUsize::new(0));
    let running = Arc::new(AtomicUsize::new(0));
    let (fetch_started, fetch_running) = (started.clone(), running.clone());
    let source = from_fn(move || {
        fetch_started.fetch_add(1, Ordering::SeqCst);
        fetch_running.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(500));
        fetch_running.fetch_sub(1, Ordering::SeqCst);
        Ok::<_, AuthenticError>("token")
    });
    let cache = MemoizedCredential::new(TimeoutSource::new(source, Duration::from_millis(10)));

    for _ in 0..20 {
        let err = cache.get().unwrap_err();
        assert!(matches!(err, AuthenticError::Timeout(_)));
    }

    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert!(running.load(Ordering::SeqCst) <= 1);
    Ok(())
}
