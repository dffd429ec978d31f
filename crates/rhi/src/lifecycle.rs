//! Lifecycle contract shared by the graphics components.
//!
//! Construction is each type's `new`, which receives its dependencies
//! explicitly. After that every component exposes the same two hooks so an
//! owner can tick and tear down a stack of them uniformly.

use crate::error::RhiResult;

/// A long-lived piece of the graphics stack.
pub trait Subsystem {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Per-frame housekeeping. Most components have none.
    fn update(&mut self) -> RhiResult<()> {
        Ok(())
    }

    /// Releases every GPU object the component owns.
    ///
    /// Must be idempotent: a second call, or the `Drop` that follows an
    /// explicit call, does nothing.
    fn shutdown(&mut self);
}
