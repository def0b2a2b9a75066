// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error type shared by every tree operation.

use alloc::boxed::Box;

use crate::id::{AspectId, NodeId};

/// Errors raised by tree mutation, lifecycle, and traversal operations.
///
/// Every variant other than [`Callback`](Self::Callback) reports a violated
/// precondition. These are raised synchronously before the tree is touched
/// and are never retried. `Callback` carries a failure reported by an
/// [`Aspect`](crate::Aspect) hook; it unwinds through the traversal, which
/// releases its status flags on the way out.
///
/// A failing `will_*` hook of the node being changed stops the change before
/// it starts. Hooks of other nodes that a mutation reaches, such as the old
/// parent of a moved child, can fail after part of the change is done; the
/// tree stays structurally valid but the mutation is left incomplete.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// `mount` was called on a node that is already mounted.
    #[error("{0:?} is already mounted")]
    AlreadyMounted(NodeId),
    /// `unmount` was called on a node that is not mounted.
    #[error("{0:?} is already unmounted")]
    AlreadyUnmounted(NodeId),
    /// A pass was started on a node that a pass is already visiting.
    #[error("{0:?} is already traversing")]
    AlreadyTraversing(NodeId),
    /// A scheduler pass was started while another pass was running.
    #[error("an update pass is already running")]
    PassInProgress,
    /// The node is not a child of the given parent.
    #[error("{child:?} is not a child of {parent:?}")]
    NotAChild {
        /// The node the operation was addressed to.
        parent: NodeId,
        /// The node that was expected to be one of its children.
        child: NodeId,
    },
    /// The aspect is not attached to the given node.
    #[error("{aspect:?} is not attached to {node:?}")]
    NotAMember {
        /// The node the operation was addressed to.
        node: NodeId,
        /// The aspect that was expected to be attached to it.
        aspect: AspectId,
    },
    /// A tree-relative query was issued on a detached aspect.
    #[error("{0:?} is not attached to a node")]
    NoOwner(AspectId),
    /// The handle does not refer to a live node.
    #[error("{0:?} does not refer to a live node")]
    StaleNode(NodeId),
    /// The handle does not refer to a live aspect.
    #[error("{0:?} does not refer to a live aspect")]
    StaleAspect(AspectId),
    /// Inserting `child` under `parent` would make a node its own ancestor.
    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle {
        /// The prospective parent.
        parent: NodeId,
        /// The prospective child, an ancestor of `parent` (or `parent` itself).
        child: NodeId,
    },
    /// A root-only operation was addressed to a node that has a parent.
    #[error("{0:?} has a parent")]
    HasParent(NodeId),
    /// The aspect is executing one of its own hooks and cannot be handed out.
    #[error("{0:?} is busy running a hook")]
    AspectBusy(AspectId),
    /// A hook reported a failure of its own.
    #[error("hook failed: {0}")]
    Callback(#[source] Box<dyn core::error::Error + Send + Sync + 'static>),
}

impl ModelError {
    /// Wraps an arbitrary hook failure.
    pub fn callback(error: impl core::error::Error + Send + Sync + 'static) -> Self {
        Self::Callback(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use core::error::Error;
    use core::fmt;

    #[derive(Debug)]
    struct Boom;

    impl fmt::Display for Boom {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("boom")
        }
    }

    impl Error for Boom {}

    #[test]
    fn callback_keeps_its_source() {
        let err = ModelError::callback(Boom);
        assert_eq!(err.to_string(), "hook failed: boom");
        assert!(err.source().is_some());
    }
}
