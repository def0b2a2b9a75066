// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Aspects: attachable behavior bound to one node.

use alloc::boxed::Box;
use alloc::string::String;
use core::any::Any;
use core::fmt;

use crate::context::{ModelContext, UpdateContext};
use crate::error::ModelError;
use crate::flags::{AspectFlags, Flags, Phase};
use crate::id::{AspectId, NodeId};
use crate::traverse::ChildWalk;
use crate::tree::Tree;

/// An attachable unit of behavior.
///
/// An aspect is attached to at most one node at a time (its *owner*) and
/// takes part in every lifecycle step of that node. For each step the
/// owner's aspects run in attachment order, before the node's observers.
///
/// The work done by a pass lives here: a pass only decides *when*
/// [`on_phase`](Self::on_phase) runs for which node. Aspects can also
/// reshape traversal through [`analyze_children`](Self::analyze_children) and
/// [`refresh_children`](Self::refresh_children), and filter dirty requests
/// through [`needs_update`](Self::needs_update).
///
/// While one of its hooks runs, an aspect is checked out of the tree. Hooks
/// that would fire on it in the meantime (for example because it removes
/// its own owner) are skipped for that aspect.
///
/// Every hook defaults to a no-op.
///
/// # Example
///
/// ```
/// use understory_model::{Aspect, Flags, ModelError, NodeId, Phase, Tree, UpdateContext};
///
/// #[derive(Default)]
/// struct Counter {
///     mutations: u32,
/// }
///
/// impl Aspect for Counter {
///     fn on_phase(
///         &mut self,
///         _tree: &mut Tree,
///         _node: NodeId,
///         phase: Phase,
///         _flags: Flags,
///         _cx: &UpdateContext,
///     ) -> Result<(), ModelError> {
///         if phase == Phase::Mutate {
///             self.mutations += 1;
///         }
///         Ok(())
///     }
/// }
///
/// let mut tree = Tree::new();
/// let root = tree.create_node();
/// let counter = tree.insert_aspect(root, Counter::default(), None)?;
/// tree.mount(root)?;
/// tree.require_update(root, Flags::NEEDS_MUTATE, false)?;
/// tree.run_analyze_pass()?;
/// assert_eq!(tree.aspect_ref::<Counter>(counter).unwrap().mutations, 1);
/// # Ok::<(), ModelError>(())
/// ```
pub trait Aspect<X: ModelContext = UpdateContext>: Any {
    /// Called before the aspect is attached to `node`.
    fn will_attach(
        &mut self,
        tree: &mut Tree<X>,
        this: AspectId,
        node: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, this, node);
        Ok(())
    }

    /// Called after the aspect has been attached to `node`.
    fn did_attach(
        &mut self,
        tree: &mut Tree<X>,
        this: AspectId,
        node: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, this, node);
        Ok(())
    }

    /// Called before the aspect is detached from `node`.
    fn will_detach(
        &mut self,
        tree: &mut Tree<X>,
        this: AspectId,
        node: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, this, node);
        Ok(())
    }

    /// Called after the aspect has been detached from `node`.
    fn did_detach(
        &mut self,
        tree: &mut Tree<X>,
        this: AspectId,
        node: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, this, node);
        Ok(())
    }

    /// Called before the aspect becomes mounted with its owner.
    fn will_mount(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// Called after the aspect became mounted with its owner.
    fn did_mount(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// Called before the aspect becomes unmounted.
    fn will_unmount(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// Called after the aspect became unmounted.
    fn did_unmount(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// The owner gained its first consumer, or the aspect joined a consumed owner.
    fn start_consuming(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// The owner lost its last consumer, or the aspect left a consumed owner.
    fn stop_consuming(&mut self, tree: &mut Tree<X>, node: NodeId) -> Result<(), ModelError> {
        let _ = (tree, node);
        Ok(())
    }

    /// `child` is about to be inserted under the owner.
    fn will_insert_child(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        child: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, child);
        Ok(())
    }

    /// `child` has been inserted under the owner.
    fn did_insert_child(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        child: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, child);
        Ok(())
    }

    /// `child` is about to be removed from the owner.
    fn will_remove_child(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        child: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, child);
        Ok(())
    }

    /// `child` has been removed from the owner.
    fn did_remove_child(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        child: NodeId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, child);
        Ok(())
    }

    /// Another aspect is about to be attached to the owner.
    fn will_insert_aspect(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, aspect);
        Ok(())
    }

    /// Another aspect has been attached to the owner.
    fn did_insert_aspect(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, aspect);
        Ok(())
    }

    /// Another aspect is about to be detached from the owner.
    fn will_remove_aspect(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, aspect);
        Ok(())
    }

    /// Another aspect has been detached from the owner.
    fn did_remove_aspect(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, aspect);
        Ok(())
    }

    /// Filters a dirty request on its way from `node` toward the root.
    ///
    /// Called once per aspect per node the request passes through, in
    /// attachment order; each aspect sees the flags returned by the previous
    /// one. Returning more bits upgrades the request; returning fewer
    /// downgrades it, and an empty result stops the request at this node.
    fn needs_update(
        &mut self,
        tree: &Tree<X>,
        node: NodeId,
        flags: Flags,
        immediate: bool,
    ) -> Flags {
        let _ = (tree, node, immediate);
        flags
    }

    /// Filters the flags an analyze pass is about to run `node` with.
    ///
    /// Asked each time the pass reaches `node`: once per sub-phase walk
    /// that descends into it, and once when the envelope walk enters it.
    /// Fine bits left out are not run on this visit and are requested
    /// again after it.
    fn needs_analyze(&mut self, tree: &Tree<X>, node: NodeId, flags: Flags, cx: &X) -> Flags {
        let _ = (tree, node, cx);
        flags
    }

    /// Filters the flags a refresh pass is about to run `node` with.
    fn needs_refresh(&mut self, tree: &Tree<X>, node: NodeId, flags: Flags, cx: &X) -> Flags {
        let _ = (tree, node, cx);
        flags
    }

    /// `phase` is starting on the owner.
    fn will_phase(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        phase: Phase,
        flags: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, phase, flags, cx);
        Ok(())
    }

    /// `phase` is doing its work on the owner, before any child is visited.
    fn on_phase(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        phase: Phase,
        flags: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, phase, flags, cx);
        Ok(())
    }

    /// `phase` has finished on the owner and every child it visited.
    fn did_phase(
        &mut self,
        tree: &mut Tree<X>,
        node: NodeId,
        phase: Phase,
        flags: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        let _ = (tree, node, phase, flags, cx);
        Ok(())
    }

    /// Wraps the owner's children walk during the analyze pass.
    ///
    /// The first attached aspect wraps the second, and so on down to the
    /// default walk. Call [`ChildWalk::proceed`] to continue the chain,
    /// [`ChildWalk::visit`] to visit a single child, or neither to prune the
    /// subtree for this step. [`ChildWalk::phase`] tells which step is
    /// walking.
    fn analyze_children(
        &mut self,
        walk: &mut ChildWalk<'_, X>,
        flags: Flags,
    ) -> Result<(), ModelError> {
        walk.proceed(flags)
    }

    /// Wraps the owner's children walk during the refresh pass.
    ///
    /// See [`analyze_children`](Self::analyze_children).
    fn refresh_children(
        &mut self,
        walk: &mut ChildWalk<'_, X>,
        flags: Flags,
    ) -> Result<(), ModelError> {
        walk.proceed(flags)
    }
}

/// Arena entry for one aspect.
pub(crate) struct AspectData<X: ModelContext> {
    pub(crate) owner: Option<NodeId>,
    pub(crate) key: Option<String>,
    pub(crate) flags: AspectFlags,
    /// `None` while the aspect is checked out to run one of its hooks.
    pub(crate) behavior: Option<Box<dyn Aspect<X>>>,
}

impl<X: ModelContext> AspectData<X> {
    pub(crate) fn new(behavior: Box<dyn Aspect<X>>) -> Self {
        Self {
            owner: None,
            key: None,
            flags: AspectFlags::empty(),
            behavior: Some(behavior),
        }
    }
}

impl<X: ModelContext> fmt::Debug for AspectData<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectData")
            .field("owner", &self.owner)
            .field("key", &self.key)
            .field("flags", &self.flags)
            .field("busy", &self.behavior.is_none())
            .finish()
    }
}
