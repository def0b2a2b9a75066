// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dirty requests and their propagation toward the scheduler.

use smallvec::SmallVec;

use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::Flags;
use crate::id::{AspectId, NodeId};
use crate::tree::Tree;

impl<X: ModelContext> Tree<X> {
    /// Marks `node` dirty for `flags`.
    ///
    /// Coarse bits implied by `flags` are added, and only the bits `node`
    /// does not already carry are requested. The request then bubbles to
    /// the root and, if the root is mounted, reaches the scheduler. With
    /// `immediate`, the scheduler runs the pass synchronously when it can.
    ///
    /// ```
    /// use understory_model::{Flags, Tree};
    ///
    /// let mut tree = Tree::new();
    /// let root = tree.create_node();
    /// let leaf = tree.create_node();
    /// tree.append_child(root, leaf, None)?;
    /// tree.mount(root)?;
    ///
    /// tree.require_update(leaf, Flags::NEEDS_VALIDATE, false)?;
    /// assert!(tree.flags(leaf).unwrap().contains(Flags::NEEDS_VALIDATE | Flags::NEEDS_REFRESH));
    /// assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_REFRESH));
    /// assert!(tree.scheduler().flags().contains(Flags::NEEDS_VALIDATE));
    /// # Ok::<(), understory_model::ModelError>(())
    /// ```
    pub fn require_update(
        &mut self,
        node: NodeId,
        flags: Flags,
        immediate: bool,
    ) -> Result<(), ModelError> {
        let data = self.node_mut(node)?;
        let delta = flags.implied().dirty() & !data.flags;
        if delta.is_empty() {
            return Ok(());
        }
        data.flags.insert(delta);
        tracing::trace!(?node, ?delta, immediate, "require update");
        self.request_update(node, node, delta, immediate)
    }

    /// Requires an update of the node `aspect` is attached to.
    pub fn aspect_require_update(
        &mut self,
        aspect: AspectId,
        flags: Flags,
        immediate: bool,
    ) -> Result<(), ModelError> {
        let node = self.aspect_owner(aspect)?;
        self.require_update(node, flags, immediate)
    }

    /// Forwards a dirty request for `target` through `node` and up to the
    /// scheduler.
    ///
    /// The aspects of `node` filter the request in attachment order through
    /// [`Aspect::needs_update`](crate::Aspect::needs_update); bits they add
    /// are set on `node`, and an empty result stops the request here.
    /// Otherwise `node` gets the coarse bits of the request and the request
    /// continues with its parent, or with the scheduler if `node` is a
    /// mounted root. Every node above `target` also remembers the fine bits
    /// passing through, so sub-phase walks can find the nodes that need them.
    pub fn request_update(
        &mut self,
        node: NodeId,
        target: NodeId,
        flags: Flags,
        immediate: bool,
    ) -> Result<(), ModelError> {
        let requested = flags.dirty();
        let data = self.node_mut(node)?;
        if node != target {
            data.below.insert(requested.fine());
        }
        let aspects: SmallVec<[AspectId; 4]> = data.aspects.iter().copied().collect();
        let mut flags = requested;
        for aspect in aspects {
            if !self.is_attached_to(aspect, node) {
                continue;
            }
            if let Some(filtered) =
                self.with_aspect(aspect, |a, tree| a.needs_update(tree, node, flags, immediate))
            {
                flags = filtered.dirty();
            }
        }
        if flags.is_empty() {
            tracing::trace!(?node, ?target, "update request absorbed");
            return Ok(());
        }

        let data = self.node_mut(node)?;
        let upgraded = flags & !requested;
        data.flags.insert(flags.coarse() | upgraded.implied());
        let parent = data.parent;
        let mounted = data.flags.contains(Flags::MOUNTED);
        match parent {
            Some(parent) => self.request_update(parent, target, flags, immediate),
            None if mounted => self.schedule_request(flags, immediate),
            None => Ok(()),
        }
    }

    /// Union of the dirty bits in the subtrees of the children of `node`.
    pub(crate) fn children_dirty(&self, node: NodeId) -> Flags {
        let Some(data) = self.nodes.get(node) else {
            return Flags::empty();
        };
        data.children
            .iter()
            .filter_map(|&child| self.nodes.get(child))
            .fold(Flags::empty(), |acc, child| acc | child.subtree_dirty())
    }

    /// Rebuilds the descendant bits of `node` and its ancestors after a
    /// subtree left, stopping at the first node that does not change.
    pub(crate) fn settle_below(&mut self, node: NodeId) {
        let mut next = Some(node);
        while let Some(node) = next {
            let below = self.children_dirty(node).fine();
            let Some(data) = self.nodes.get_mut(node) else {
                return;
            };
            if data.below == below {
                return;
            }
            data.below = below;
            next = data.parent;
        }
    }
}
