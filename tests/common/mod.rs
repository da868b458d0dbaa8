//! Shared test helpers: logging init (teacher pattern, not part of the
//! library itself since `env_logger` is a dev-dependency) and a few small
//! fixture builders reused across the integration suites.

use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize `env_logger` once per test binary. Safe to call from every
/// test; later calls are no-ops.
pub fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn shuffled_range(n: i32) -> Vec<i32> {
    let mut v: Vec<i32> = (0..n).collect();
    // Deterministic "shuffle" so tests stay reproducible without pulling in
    // a random crate just for fixtures.
    v.reverse();
    for i in (1..v.len()).step_by(2) {
        v.swap(i, i - 1);
    }
    v
}
