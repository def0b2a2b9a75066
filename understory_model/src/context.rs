// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pass contexts.

/// A read-only value threaded through every callback of one pass.
///
/// The engine never looks inside a context beyond its update time. The
/// embedding application chooses the concrete type and supplies a factory
/// through [`Tree::with_context`](crate::Tree::with_context).
pub trait ModelContext: 'static {
    /// Time at which the pass started, in milliseconds.
    ///
    /// Never decreases from one pass to the next within a tree.
    fn update_time(&self) -> u64;
}

/// The default context: just the update time.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct UpdateContext {
    /// Time at which the pass started, in milliseconds.
    pub update_time: u64,
}

impl UpdateContext {
    /// Creates a context for a pass starting at `update_time`.
    #[must_use]
    pub const fn new(update_time: u64) -> Self {
        Self { update_time }
    }
}

impl ModelContext for UpdateContext {
    fn update_time(&self) -> u64 {
        self.update_time
    }
}
