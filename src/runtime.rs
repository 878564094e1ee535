//! `may` scheduler setup.

use crate::config::RuntimeConfig;

/// Apply worker count and coroutine stack size. Call once, before the first
/// coroutine is spawned.
pub fn configure(config: &RuntimeConfig) {
    let workers = config.workers.max(1);
    may::config()
        .set_workers(workers)
        .set_stack_size(config.stack_size);
    log::info!(
        "may runtime: {workers} workers, {:#x} byte coroutine stacks",
        config.stack_size
    );
}
