// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Child and aspect mutation.

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use core::any::Any;

use smallvec::SmallVec;

use crate::aspect::{Aspect, AspectData};
use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::{AspectFlags, Flags};
use crate::id::{AspectId, NodeId};
use crate::node::NodeData;
use crate::tree::Tree;

impl<X: ModelContext> Tree<X> {
    /// Creates a detached, unkeyed node.
    pub fn create_node(&mut self) -> NodeId {
        self.nodes.insert(NodeData::new(None))
    }

    /// Creates a detached node that is stored under `key` whenever it is
    /// inserted without an explicit key.
    pub fn create_keyed_node(&mut self, key: impl Into<String>) -> NodeId {
        self.nodes.insert(NodeData::new(Some(key.into())))
    }

    /// Appends `child` to the children of `parent`.
    ///
    /// See [`insert_child`](Self::insert_child).
    pub fn append_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        key: Option<&str>,
    ) -> Result<(), ModelError> {
        self.insert_child(parent, child, None, key)
    }

    /// Inserts `child` under `parent`, before `before` or at the end.
    ///
    /// A `child` that already has a parent is removed from it first. `key`
    /// overrides the child's own key; if another child of `parent` holds the
    /// key it is removed and `child` takes its place. If `parent` is mounted,
    /// `child` and its subtree are mounted, and any dirty bits pending in the
    /// subtree are bubbled up from `parent`.
    ///
    /// Fails without touching the tree if either node is stale, if `child`
    /// is `parent` or one of its ancestors, if `before` is not a child of
    /// `parent`, or if `child` is a mounted root. The `will_insert_child`
    /// hooks of `parent` also run before anything moves, so their errors
    /// leave the tree as it was.
    pub fn insert_child(
        &mut self,
        parent: NodeId,
        child: NodeId,
        before: Option<NodeId>,
        key: Option<&str>,
    ) -> Result<(), ModelError> {
        self.node(parent)?;
        let child_data = self.node(child)?;
        if child_data.parent.is_none() && child_data.flags.contains(Flags::MOUNTED) {
            return Err(ModelError::AlreadyMounted(child));
        }
        let key = key.map(String::from).or_else(|| child_data.default_key.clone());
        if self.is_ancestor_or_self(child, parent) {
            return Err(ModelError::Cycle { parent, child });
        }
        if let Some(before) = before {
            if self.parent(before) != Some(parent) {
                return Err(ModelError::NotAChild {
                    parent,
                    child: before,
                });
            }
        }
        let mut before = before;
        if before == Some(child) {
            before = self.next_sibling(child);
        }

        self.each_aspect(parent, None, |aspect, tree| {
            aspect.will_insert_child(tree, parent, child)
        })?;
        self.notify(parent, |observer| observer.will_insert_child(parent, child));

        if let Some(old_parent) = self.parent(child) {
            self.remove_child(old_parent, child)?;
        }
        if let Some(key) = key.as_deref() {
            if let Some(holder) = self.child(parent, key) {
                if before == Some(holder) {
                    before = self.next_sibling(holder);
                }
                self.remove_child(parent, holder)?;
            }
        }
        // A hook may have moved `before` away; the child then goes last.
        let data = self.node_mut(parent)?;
        let index = before
            .and_then(|before| data.children.iter().position(|&c| c == before))
            .unwrap_or(data.children.len());
        data.children.insert(index, child);
        if let Some(key) = key.as_ref() {
            data.children_by_key.insert(key.clone(), child);
        }
        let parent_mounted = data.flags.contains(Flags::MOUNTED);
        let data = self.node_mut(child)?;
        data.parent = Some(parent);
        data.key = key.clone();
        let pending = data.subtree_dirty();
        tracing::trace!(?parent, ?child, index, key = key.as_deref(), "insert child");

        if parent_mounted {
            self.cascade_mount(child)?;
        }
        if let Some(key) = key.as_deref() {
            self.decohere(parent, key)?;
        }
        if !pending.is_empty() {
            self.request_update(parent, child, pending, false)?;
        }

        self.each_aspect(parent, None, |aspect, tree| {
            aspect.did_insert_child(tree, parent, child)
        })?;
        self.notify(parent, |observer| observer.did_insert_child(parent, child));
        Ok(())
    }

    /// Replaces `old` with `new` at the same position, under the key of
    /// `old` if it had one. `old` stays alive, detached.
    pub fn replace_child(
        &mut self,
        parent: NodeId,
        new: NodeId,
        old: NodeId,
    ) -> Result<(), ModelError> {
        if self.parent(old) != Some(parent) {
            return Err(ModelError::NotAChild { parent, child: old });
        }
        if new == old {
            return Ok(());
        }
        match self.key(old).map(String::from) {
            Some(key) => self.insert_child(parent, new, Some(old), Some(&key)),
            None => {
                self.insert_child(parent, new, Some(old), None)?;
                self.remove_child(parent, old)
            }
        }
    }

    /// Stores `child` under `key` in `parent`, or clears the key if `child`
    /// is `None`. Returns the previous holder of the key.
    pub fn set_child(
        &mut self,
        parent: NodeId,
        key: &str,
        child: Option<NodeId>,
    ) -> Result<Option<NodeId>, ModelError> {
        self.node(parent)?;
        let old = self.child(parent, key);
        match child {
            Some(child) if Some(child) == old => {}
            Some(child) => self.insert_child(parent, child, old, Some(key))?,
            None => {
                if let Some(old) = old {
                    self.remove_child(parent, old)?;
                }
            }
        }
        Ok(old)
    }

    /// Detaches `child` from `parent`, unmounting it if it was mounted.
    ///
    /// The child and its subtree stay alive until they are inserted again
    /// or [disposed](Self::dispose).
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> Result<(), ModelError> {
        self.node(parent)?;
        if self.node(child)?.parent != Some(parent) {
            return Err(ModelError::NotAChild { parent, child });
        }

        self.each_aspect(parent, None, |aspect, tree| {
            aspect.will_remove_child(tree, parent, child)
        })?;
        self.notify(parent, |observer| observer.will_remove_child(parent, child));

        if self.is_mounted(child) {
            self.cascade_unmount(child)?;
        }

        let data = self.node_mut(child)?;
        if data.parent != Some(parent) {
            // A hook moved it elsewhere already.
            return Ok(());
        }
        data.parent = None;
        data.flags.remove(Flags::REMOVING);
        let key = data.key.take();
        let data = self.node_mut(parent)?;
        data.children.retain(|&c| c != child);
        if let Some(key) = key.as_deref() {
            if data.children_by_key.get(key) == Some(&child) {
                data.children_by_key.remove(key);
            }
        }
        tracing::trace!(?parent, ?child, key = key.as_deref(), "remove child");
        self.settle_below(parent);

        if let Some(key) = key.as_deref() {
            self.decohere(parent, key)?;
        }

        self.each_aspect(parent, None, |aspect, tree| {
            aspect.did_remove_child(tree, parent, child)
        })?;
        self.notify(parent, |observer| observer.did_remove_child(parent, child));
        Ok(())
    }

    /// Removes the child stored under `key`, returning it.
    pub fn remove_child_by_key(
        &mut self,
        parent: NodeId,
        key: &str,
    ) -> Result<Option<NodeId>, ModelError> {
        self.node(parent)?;
        let Some(child) = self.child(parent, key) else {
            return Ok(None);
        };
        self.remove_child(parent, child)?;
        Ok(Some(child))
    }

    /// Removes every child of `parent`, last first.
    pub fn remove_children(&mut self, parent: NodeId) -> Result<(), ModelError> {
        let snapshot: SmallVec<[NodeId; 8]> = self.node(parent)?.children.iter().copied().collect();
        for child in snapshot.into_iter().rev() {
            if self.parent(child) == Some(parent) {
                self.remove_child(parent, child)?;
            }
        }
        Ok(())
    }

    /// Removes `node` from its parent.
    ///
    /// While a pass is visiting `node` the removal is deferred: the node is
    /// marked [`REMOVING`](Flags::REMOVING) and its parent's children walk
    /// removes it once the visit returns. Removing a root does nothing.
    pub fn remove(&mut self, node: NodeId) -> Result<(), ModelError> {
        let data = self.node_mut(node)?;
        let Some(parent) = data.parent else {
            return Ok(());
        };
        if data.flags.contains(Flags::TRAVERSING) {
            data.flags.insert(Flags::REMOVING);
            tracing::trace!(?node, "removal deferred until traversal returns");
            return Ok(());
        }
        self.remove_child(parent, node)
    }

    /// Frees a detached, unmounted subtree and every aspect attached in it.
    ///
    /// All handles into the subtree become stale.
    pub fn dispose(&mut self, node: NodeId) -> Result<(), ModelError> {
        let data = self.node(node)?;
        if data.parent.is_some() {
            return Err(ModelError::HasParent(node));
        }
        if data.flags.contains(Flags::MOUNTED) {
            return Err(ModelError::AlreadyMounted(node));
        }
        let mut stack: SmallVec<[NodeId; 8]> = SmallVec::new();
        stack.push(node);
        let mut freed = 0_usize;
        while let Some(next) = stack.pop() {
            let Some(data) = self.nodes.remove(next) else {
                continue;
            };
            for aspect in data.aspects {
                self.aspects.remove(aspect);
            }
            stack.extend(data.children);
            freed += 1;
        }
        tracing::trace!(?node, freed, "disposed subtree");
        Ok(())
    }

    pub(crate) fn next_sibling(&self, node: NodeId) -> Option<NodeId> {
        let siblings = self.children(self.parent(node)?);
        let index = siblings.iter().position(|&c| c == node)?;
        siblings.get(index + 1).copied()
    }

    /// Adds a detached aspect to the arena.
    pub fn create_aspect(&mut self, aspect: impl Aspect<X>) -> AspectId {
        self.aspects.insert(AspectData::new(Box::new(aspect)))
    }

    /// Creates `aspect` and attaches it to `node` under `key`.
    pub fn insert_aspect(
        &mut self,
        node: NodeId,
        aspect: impl Aspect<X>,
        key: Option<&str>,
    ) -> Result<AspectId, ModelError> {
        self.node(node)?;
        let id = self.create_aspect(aspect);
        if let Err(err) = self.attach_aspect(node, id, key) {
            if self.aspect_data(id).is_ok_and(|data| data.owner.is_none()) {
                self.aspects.remove(id);
            }
            return Err(err);
        }
        Ok(id)
    }

    /// Attaches `aspect` to `node`, detaching it from its current owner first.
    ///
    /// `key` overrides the aspect's own key. An aspect of `node` already
    /// holding the key is detached and stays alive. The aspect is mounted
    /// and starts consuming if `node` is.
    pub fn attach_aspect(
        &mut self,
        node: NodeId,
        aspect: AspectId,
        key: Option<&str>,
    ) -> Result<(), ModelError> {
        self.node(node)?;
        let key = key
            .map(String::from)
            .or_else(|| self.aspects.get(aspect).and_then(|data| data.key.clone()));
        if self.aspect_data(aspect)?.owner.is_some() {
            self.detach_aspect(aspect)?;
        }
        if let Some(key) = key.as_deref() {
            if let Some(holder) = self.aspect(node, key) {
                self.detach_aspect(holder)?;
            }
        }

        self.each_aspect(node, Some(aspect), |other, tree| {
            other.will_insert_aspect(tree, node, aspect)
        })?;
        self.notify(node, |observer| observer.will_insert_aspect(node, aspect));
        if let Some(result) = self.with_aspect(aspect, |a, tree| a.will_attach(tree, aspect, node)) {
            result?;
        }

        let data = self.node_mut(node)?;
        data.aspects.push(aspect);
        if let Some(key) = key.as_ref() {
            data.aspects_by_key.insert(key.clone(), aspect);
        }
        let node_flags = data.flags;
        let slot = self
            .aspects
            .get_mut(aspect)
            .ok_or(ModelError::StaleAspect(aspect))?;
        slot.owner = Some(node);
        slot.key = key.clone();
        tracing::trace!(?node, ?aspect, key = key.as_deref(), "attach aspect");

        if let Some(result) = self.with_aspect(aspect, |a, tree| a.did_attach(tree, aspect, node)) {
            result?;
        }
        if node_flags.contains(Flags::MOUNTED) {
            self.mount_aspect(node, aspect)?;
        }
        if node_flags.contains(Flags::CONSUMING) {
            self.start_consuming_aspect(node, aspect)?;
        }
        if let Some(key) = key.as_deref() {
            self.decohere(node, key)?;
        }

        self.each_aspect(node, Some(aspect), |other, tree| {
            other.did_insert_aspect(tree, node, aspect)
        })?;
        self.notify(node, |observer| observer.did_insert_aspect(node, aspect));
        Ok(())
    }

    /// Detaches `aspect` from its owner, stopping consumption and
    /// unmounting it first. The aspect stays alive.
    pub fn detach_aspect(&mut self, aspect: AspectId) -> Result<(), ModelError> {
        let node = self.aspect_owner(aspect)?;

        self.each_aspect(node, Some(aspect), |other, tree| {
            other.will_remove_aspect(tree, node, aspect)
        })?;
        self.notify(node, |observer| observer.will_remove_aspect(node, aspect));

        let flags = self.aspect_data(aspect)?.flags;
        if flags.contains(AspectFlags::CONSUMING) {
            self.stop_consuming_aspect(node, aspect)?;
        }
        if flags.contains(AspectFlags::MOUNTED) {
            self.unmount_aspect(node, aspect)?;
        }
        if let Some(result) = self.with_aspect(aspect, |a, tree| a.will_detach(tree, aspect, node)) {
            result?;
        }

        let slot = self
            .aspects
            .get_mut(aspect)
            .ok_or(ModelError::StaleAspect(aspect))?;
        if slot.owner != Some(node) {
            return Ok(());
        }
        slot.owner = None;
        let key = slot.key.clone();
        let data = self.node_mut(node)?;
        data.aspects.retain(|&a| a != aspect);
        if let Some(key) = key.as_deref() {
            if data.aspects_by_key.get(key) == Some(&aspect) {
                data.aspects_by_key.remove(key);
            }
        }
        tracing::trace!(?node, ?aspect, key = key.as_deref(), "detach aspect");

        if let Some(result) = self.with_aspect(aspect, |a, tree| a.did_detach(tree, aspect, node)) {
            result?;
        }
        if let Some(key) = key.as_deref() {
            self.decohere(node, key)?;
        }

        self.each_aspect(node, Some(aspect), |other, tree| {
            other.did_remove_aspect(tree, node, aspect)
        })?;
        self.notify(node, |observer| observer.did_remove_aspect(node, aspect));
        Ok(())
    }

    /// Detaches `aspect` from `node`.
    ///
    /// Fails with [`ModelError::NotAMember`] if `aspect` is not attached to
    /// `node`.
    pub fn remove_aspect(&mut self, node: NodeId, aspect: AspectId) -> Result<(), ModelError> {
        self.node(node)?;
        if self.aspect_data(aspect)?.owner != Some(node) {
            return Err(ModelError::NotAMember { node, aspect });
        }
        self.detach_aspect(aspect)
    }

    /// Removes the aspect stored under `key` on `node`, returning it.
    pub fn remove_aspect_by_key(
        &mut self,
        node: NodeId,
        key: &str,
    ) -> Result<Option<AspectId>, ModelError> {
        self.node(node)?;
        let Some(aspect) = self.aspect(node, key) else {
            return Ok(None);
        };
        self.detach_aspect(aspect)?;
        Ok(Some(aspect))
    }

    /// Detaches `aspect` if needed and frees it, returning its behavior.
    ///
    /// Fails with [`ModelError::AspectBusy`] while one of its own hooks runs.
    pub fn dispose_aspect(&mut self, aspect: AspectId) -> Result<Box<dyn Aspect<X>>, ModelError> {
        if self.aspect_data(aspect)?.behavior.is_none() {
            return Err(ModelError::AspectBusy(aspect));
        }
        if self.aspect_data(aspect)?.owner.is_some() {
            self.detach_aspect(aspect)?;
        }
        self.aspects
            .remove(aspect)
            .and_then(|data| data.behavior)
            .ok_or(ModelError::AspectBusy(aspect))
    }

    /// Returns the node `aspect` is attached to.
    pub fn aspect_owner(&self, aspect: AspectId) -> Result<NodeId, ModelError> {
        self.aspect_data(aspect)?
            .owner
            .ok_or(ModelError::NoOwner(aspect))
    }

    /// Returns the key `aspect` is, or will be, stored under.
    #[must_use]
    pub fn aspect_key(&self, aspect: AspectId) -> Option<&str> {
        self.aspects.get(aspect)?.key.as_deref()
    }

    /// Changes the key of `aspect`.
    ///
    /// An attached aspect is re-attached to its owner under the new key.
    pub fn set_aspect_key(&mut self, aspect: AspectId, key: Option<&str>) -> Result<(), ModelError> {
        let data = self
            .aspects
            .get_mut(aspect)
            .ok_or(ModelError::StaleAspect(aspect))?;
        if let Some(node) = data.owner {
            return self.attach_aspect(node, aspect, key);
        }
        data.key = key.map(ToString::to_string);
        Ok(())
    }

    /// Returns the status bits of `aspect`.
    #[must_use]
    pub fn aspect_flags(&self, aspect: AspectId) -> Option<AspectFlags> {
        Some(self.aspects.get(aspect)?.flags)
    }

    /// Returns `true` if `aspect` refers to a live aspect.
    #[must_use]
    pub fn contains_aspect(&self, aspect: AspectId) -> bool {
        self.aspects.contains(aspect)
    }

    /// Borrows the behavior of `aspect` as an `A`.
    ///
    /// Returns `None` if the aspect is stale, is not an `A`, or is running
    /// one of its own hooks.
    #[must_use]
    pub fn aspect_ref<A: Aspect<X>>(&self, aspect: AspectId) -> Option<&A> {
        let behavior: &dyn Aspect<X> = self.aspects.get(aspect)?.behavior.as_deref()?;
        let any: &dyn Any = behavior;
        any.downcast_ref()
    }

    /// Mutably borrows the behavior of `aspect` as an `A`.
    ///
    /// See [`aspect_ref`](Self::aspect_ref).
    #[must_use]
    pub fn aspect_mut<A: Aspect<X>>(&mut self, aspect: AspectId) -> Option<&mut A> {
        let behavior: &mut dyn Aspect<X> = self.aspects.get_mut(aspect)?.behavior.as_deref_mut()?;
        let any: &mut dyn Any = behavior;
        any.downcast_mut()
    }
}
