//! Deadline contexts on the shared reactor backend.
//!
//! Runs in its own test binary because the timer backend is chosen once
//! per process.

#[macro_use]
mod common;

use common::*;
use cspsync::config::{self, Config, TimerBackend};
use cspsync::context::{background, with_cancel, with_timeout};
use cspsync::ErrorKind;
use std::sync::Once;
use std::time::Duration;

static INSTALL: Once = Once::new();

fn init_test(name: &str) {
    init_test_logging();
    INSTALL.call_once(|| {
        let _ = config::install(
            Config::default()
                .timer_backend(TimerBackend::Shared)
                .timer_thread_name("shared-test"),
        );
    });
    test_phase!(name);
}

#[test]
fn reactor_fires_in_deadline_order() {
    init_test("reactor_fires_in_deadline_order");
    assert_eq!(config::global().timer_backend, TimerBackend::Shared);
    let (late, _l) = with_timeout(&background(), Duration::from_millis(80)).expect("late");
    let (early, _e) = with_timeout(&background(), Duration::from_millis(20)).expect("early");

    assert!(wait_until(Duration::from_secs(5), || early.is_canceled()));
    assert!(wait_until(Duration::from_secs(5), || late.is_canceled()));
    assert_eq!(
        late.err().expect_err("expired").kind(),
        ErrorKind::DeadlineExceeded
    );
    test_complete!("reactor_fires_in_deadline_order");
}

#[test]
fn explicit_cancel_removes_pending_deadline() {
    init_test("explicit_cancel_removes_pending_deadline");
    let (ctx, cancel) = with_timeout(&background(), Duration::from_secs(60)).expect("ctx");
    cancel.cancel();
    assert_eq!(ctx.err().expect_err("canceled").kind(), ErrorKind::Cancelled);

    // The reactor keeps serving later deadlines.
    let (next, _n) = with_timeout(&background(), Duration::from_millis(10)).expect("next");
    assert!(wait_until(Duration::from_secs(5), || next.is_canceled()));
    test_complete!("explicit_cancel_removes_pending_deadline");
}

#[test]
fn dropped_context_never_fires() {
    init_test("dropped_context_never_fires");
    let (parent, _p) = with_cancel(&background()).expect("parent");
    for _ in 0..100 {
        let (ctx, _cancel) = with_timeout(&parent, Duration::from_millis(1)).expect("ctx");
        drop(ctx);
    }
    std::thread::sleep(Duration::from_millis(20));
    assert!(parent.err().is_ok());
    test_complete!("dropped_context_never_fires");
}
