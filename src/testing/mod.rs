//! Test harness for driving the bridge without a real ISS or DUT.
//!
//! This module provides infrastructure for:
//! - Scripting a reference model instruction by instruction
//! - Seeding its memory, scalar and vector register state
//!
//! The scripted model is deliberately dumb: it replays exactly the effects a
//! test declares, which makes divergence injection (wrong bytes, missing
//! effects, traps) a one-line change in the test.

pub mod scripted;

pub use scripted::{ScriptedOp, ScriptedReference};

/// Initialize logging for a test; safe to call repeatedly.
#[cfg(test)]
pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
