//! Runtime invariant checks with a contract log.
//!
//! Signaling code calls [`check_invariant!`] at the points where an ordering or
//! ownership rule must hold. Every checked invariant is recorded in a
//! thread-local log so tests can prove the check actually ran:
//!
//! ```rust,ignore
//! use crabsignal::invariant::*;
//!
//! check_invariant!(!drained, ICE_DRAINED_ONCE, "IceBuffer::drain");
//!
//! #[test]
//! fn contract_ice_buffer() {
//!     // ... exercise the buffer ...
//!     assert_contract("ice buffer", &[ICE_DRAINED_ONCE]);
//! }
//! ```
//!
//! A violated invariant panics in debug builds and logs at `error` in release
//! builds; signaling failures are never allowed to take the process down.

use std::cell::RefCell;
use std::collections::HashSet;

pub const ICE_DRAINED_ONCE: &str = "ICE queue is drained at most once";
pub const ICE_FIFO: &str = "ICE candidates are released in arrival order";
pub const SESSION_CLOSED_ONCE: &str = "peer connection is closed at most once";
pub const SINGLE_LIVE_CALL: &str = "at most one non-terminal call session exists";
pub const TERMINAL_IS_FINAL: &str = "terminal call status never changes";

thread_local! {
    static CHECKED: RefCell<HashSet<&'static str>> = RefCell::new(HashSet::new());
}

#[macro_export]
macro_rules! check_invariant {
    ($condition:expr, $invariant:expr) => {
        $crate::invariant::__check($condition, $invariant, None)
    };
    ($condition:expr, $invariant:expr, $context:expr) => {
        $crate::invariant::__check($condition, $invariant, Some($context))
    };
}

#[doc(hidden)]
pub fn __check(condition: bool, invariant: &'static str, context: Option<&str>) {
    CHECKED.with(|log| {
        log.borrow_mut().insert(invariant);
    });

    if !condition {
        let ctx = context.unwrap_or("unknown");
        log::error!("invariant violated [{}]: {}", ctx, invariant);
        debug_assert!(condition, "invariant violated [{}]: {}", ctx, invariant);
    }
}

/// Panics unless every listed invariant was checked on this thread.
pub fn assert_contract(name: &str, required: &[&str]) {
    let missing: Vec<&str> = CHECKED.with(|log| {
        let log = log.borrow();
        required
            .iter()
            .copied()
            .filter(|inv| !log.contains(inv))
            .collect()
    });

    if !missing.is_empty() {
        panic!(
            "contract {} not exercised:\n  - {}",
            name,
            missing.join("\n  - ")
        );
    }
}

pub fn was_checked(invariant: &str) -> bool {
    CHECKED.with(|log| log.borrow().contains(invariant))
}

pub fn reset_checks() {
    CHECKED.with(|log| log.borrow_mut().clear());
}
