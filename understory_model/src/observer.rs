// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Notification-only observers.

use crate::context::{ModelContext, UpdateContext};
use crate::flags::Phase;
use crate::id::{AspectId, NodeId};

/// A sink for lifecycle notifications about one node.
///
/// Observers are registered with [`Tree::observe`](crate::Tree::observe).
/// Unlike [`Aspect`](crate::Aspect)s they cannot veto or redirect anything
/// and get no access to the tree; they are told what happened, after the
/// node's aspects for the same step. No ordering between observers of one
/// node is promised.
///
/// Every method defaults to a no-op.
pub trait Observer<X: ModelContext = UpdateContext> {
    /// The node is about to be mounted.
    fn will_mount(&mut self, node: NodeId) {
        let _ = node;
    }

    /// The node has been mounted, along with its subtree.
    fn did_mount(&mut self, node: NodeId) {
        let _ = node;
    }

    /// The node is about to be unmounted.
    fn will_unmount(&mut self, node: NodeId) {
        let _ = node;
    }

    /// The node and its subtree have been unmounted.
    fn did_unmount(&mut self, node: NodeId) {
        let _ = node;
    }

    /// `child` is about to be inserted under `node`.
    fn will_insert_child(&mut self, node: NodeId, child: NodeId) {
        let _ = (node, child);
    }

    /// `child` has been inserted under `node`.
    fn did_insert_child(&mut self, node: NodeId, child: NodeId) {
        let _ = (node, child);
    }

    /// `child` is about to be removed from `node`.
    fn will_remove_child(&mut self, node: NodeId, child: NodeId) {
        let _ = (node, child);
    }

    /// `child` has been removed from `node`.
    fn did_remove_child(&mut self, node: NodeId, child: NodeId) {
        let _ = (node, child);
    }

    /// `aspect` is about to be attached to `node`.
    fn will_insert_aspect(&mut self, node: NodeId, aspect: AspectId) {
        let _ = (node, aspect);
    }

    /// `aspect` has been attached to `node`.
    fn did_insert_aspect(&mut self, node: NodeId, aspect: AspectId) {
        let _ = (node, aspect);
    }

    /// `aspect` is about to be detached from `node`.
    fn will_remove_aspect(&mut self, node: NodeId, aspect: AspectId) {
        let _ = (node, aspect);
    }

    /// `aspect` has been detached from `node`.
    fn did_remove_aspect(&mut self, node: NodeId, aspect: AspectId) {
        let _ = (node, aspect);
    }

    /// `phase` is starting on `node`.
    fn will_phase(&mut self, node: NodeId, phase: Phase, cx: &X) {
        let _ = (node, phase, cx);
    }

    /// `phase` is doing its work on `node`, before any child is visited.
    fn on_phase(&mut self, node: NodeId, phase: Phase, cx: &X) {
        let _ = (node, phase, cx);
    }

    /// `phase` has finished on `node` and its subtree.
    fn did_phase(&mut self, node: NodeId, phase: Phase, cx: &X) {
        let _ = (node, phase, cx);
    }
}
