//! Process exit codes of the `repo-sync` binary.
//!
//! They follow `diff(1)`: `0` when nothing is left to do, `1` when the
//! command found something worth attention, `2` when it could not run.

/// Everything is in sync, or every target was synchronized.
pub const SUCCESS: u8 = 0;

/// `sync`: at least one target failed.
pub const FAILURE: u8 = 1;

/// `diff`: at least one target has pending changes.
pub const CHANGES_PENDING: u8 = 1;

/// The command could not run (bad configuration, unreachable root, ...).
pub const ERROR: u8 = 2;
