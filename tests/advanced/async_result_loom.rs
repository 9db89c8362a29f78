#![cfg(all(feature = "advanced-tests", loom))]
//! Concurrency tests for request cells using loom.
//!
//! Completers race from separate threads; loom explores the interleavings to
//! check that exactly one outcome is stored and that the drop of the last
//! completer never overrides an explicit resolution.

use jmswire::{
    ProviderError,
    async_result::{AsyncResultError, pair},
};
use loom::{model, thread};

#[test]
fn racing_complete_and_fail_store_one_outcome() {
    model(|| {
        let (request, mut future) = pair::<u8>();
        let other = request.clone();

        let t1 = thread::spawn(move || request.complete(1));
        let t2 = thread::spawn(move || other.fail(ProviderError::Closed));
        let completed = t1.join().expect("completing thread");
        let failed = t2.join().expect("failing thread");

        assert!(completed.is_ok() != failed.is_ok(), "exactly one resolution wins");
        match future.try_result() {
            Some(Ok(1)) => assert_eq!(failed, Err(AsyncResultError::AlreadyResolved)),
            Some(Err(ProviderError::Closed)) => {
                assert_eq!(completed, Err(AsyncResultError::AlreadyResolved));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    });
}

#[test]
fn last_completer_drop_fails_once() {
    model(|| {
        let (request, future) = pair::<()>();
        let other = request.clone();

        let t1 = thread::spawn(move || drop(request));
        let t2 = thread::spawn(move || drop(other));
        t1.join().expect("first dropping thread");
        t2.join().expect("second dropping thread");

        assert!(matches!(future.wait(None), Err(ProviderError::Closed)));
    });
}
