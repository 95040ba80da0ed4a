//! Tests for the provisioning lock.

use std::fs;
use std::sync::mpsc;
use std::thread;

use rstest::{fixture, rstest};
use tempfile::TempDir;

use super::*;

#[fixture]
fn lock_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn quick(timeout_ms: u64) -> LockOptions {
    LockOptions {
        timeout: Duration::from_millis(timeout_ms),
        poll_interval: Duration::from_millis(10),
    }
}

#[test]
fn defaults_match_documented_bounds() {
    let options = LockOptions::default();
    assert_eq!(options.timeout, Duration::from_secs(600));
    assert_eq!(options.poll_interval, Duration::from_millis(100));
}

#[rstest]
fn acquire_creates_parents_and_keeps_file(lock_dir: TempDir) {
    let path = lock_dir.path().join("nested/config/.kiln-buildkitd.lock");
    let guard = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("acquire");
    assert_eq!(guard.path(), path.as_path());
    guard.release().expect("release");
    assert!(path.exists(), "release must not delete the lock file");
}

#[rstest]
fn contended_lock_times_out_after_the_bound(lock_dir: TempDir) {
    let path = lock_dir.path().join("held.lock");
    let _holder = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("holder");

    let started = Instant::now();
    let error = LockGuard::acquire(&path, quick(200), &Cancellation::new())
        .expect_err("second acquire must time out");
    let elapsed = started.elapsed();

    match error {
        ProvisionError::LockTimeout { path: reported, waited } => {
            assert_eq!(reported, path);
            assert!(waited >= Duration::from_millis(200), "waited {waited:?}");
        }
        other => panic!("expected LockTimeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(200), "elapsed {elapsed:?}");
}

#[rstest]
fn zero_timeout_fails_on_first_contended_attempt(lock_dir: TempDir) {
    let path = lock_dir.path().join("held.lock");
    let _holder = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("holder");
    let error = LockGuard::acquire(&path, quick(0), &Cancellation::new()).expect_err("times out");
    assert!(matches!(error, ProvisionError::LockTimeout { .. }), "{error:?}");
}

#[rstest]
fn drop_releases_for_the_next_holder(lock_dir: TempDir) {
    let path = lock_dir.path().join("reuse.lock");
    {
        let _first = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("first");
    }
    let second = LockGuard::acquire(&path, quick(100), &Cancellation::new());
    assert!(second.is_ok(), "{second:?}");
}

#[rstest]
fn waiter_acquires_once_holder_releases(lock_dir: TempDir) {
    let path = lock_dir.path().join("handoff.lock");
    let holder = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("holder");
    let (acquired_tx, acquired_rx) = mpsc::channel();

    let waiter_path = path.clone();
    let waiter = thread::spawn(move || {
        let guard = LockGuard::acquire(&waiter_path, quick(5_000), &Cancellation::new());
        acquired_tx.send(()).expect("send acquired signal");
        guard.map(drop)
    });

    thread::sleep(Duration::from_millis(100));
    assert!(
        acquired_rx.try_recv().is_err(),
        "waiter must not acquire while the holder is alive"
    );
    drop(holder);

    waiter
        .join()
        .expect("waiter thread panicked")
        .expect("waiter acquires after release");
}

#[rstest]
fn cancellation_aborts_the_wait(lock_dir: TempDir) {
    let path = lock_dir.path().join("cancel.lock");
    let _holder = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect("holder");
    let cancel = Cancellation::new().with_timeout(Duration::from_millis(50));

    let error = LockGuard::acquire(&path, quick(10_000), &cancel).expect_err("cancelled");
    assert!(
        matches!(error, ProvisionError::Cancelled { stage: "lock wait" }),
        "{error:?}"
    );
}

#[rstest]
fn unusable_parent_is_a_lock_io_error(lock_dir: TempDir) {
    let blocker = lock_dir.path().join("not-a-directory");
    fs::write(&blocker, "file").expect("write blocker");
    let path = blocker.join("kiln.lock");

    let error = LockGuard::acquire(&path, quick(100), &Cancellation::new()).expect_err("io error");
    assert!(matches!(error, ProvisionError::LockIo { .. }), "{error:?}");
}
