//! Tests for the two-party handshake.

use ironbatch::BatchError;
use ironbatch::handshake::pair;
use std::thread;
use std::time::Duration;

#[test]
fn test_calls_meet_in_order() {
    let (a, b) = pair("a", "b", Some(Duration::from_secs(5)));
    assert_eq!(a.peer(), "b");
    assert_eq!(b.peer(), "a");

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..10 {
                b.await_peer().unwrap();
            }
        });
        for _ in 0..10 {
            a.await_peer().unwrap();
        }
    });

    assert!(!a.is_broken());
    assert!(!b.is_broken());
}

#[test]
fn test_timeout_breaks_the_pair() {
    let (a, b) = pair("a", "b", Some(Duration::from_millis(50)));

    let err = a.await_peer().unwrap_err();

    assert!(matches!(err, BatchError::HandshakeTimeout { ref peer, .. } if peer == "b"));
    assert!(a.is_broken());
    assert!(b.is_broken());
    assert!(matches!(b.await_peer(), Err(BatchError::HandshakeBroken { .. })));
    assert!(matches!(a.await_peer(), Err(BatchError::HandshakeBroken { .. })));
}

#[test]
fn test_break_wakes_a_peer_without_timeout() {
    let (waiting, breaking) = pair("waiting", "breaking", None);

    thread::scope(|scope| {
        let handle = scope.spawn(|| waiting.await_peer());
        thread::sleep(Duration::from_millis(20));
        breaking.break_pair();

        let result = handle.join().unwrap();
        assert!(matches!(result, Err(BatchError::HandshakeBroken { ref peer }) if peer == "breaking"));
    });
}

#[test]
fn test_dropped_peer_breaks_the_pair() {
    let (a, b) = pair("a", "b", None);
    drop(b);

    let err = a.await_peer().unwrap_err();

    assert!(err.is_handshake());
    assert!(a.is_broken());
}
