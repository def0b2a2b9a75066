// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Mount and consume lifecycles.

use smallvec::SmallVec;

use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::{AspectFlags, Flags};
use crate::id::{AspectId, NodeId};
use crate::tree::Tree;

impl<X: ModelContext> Tree<X> {
    /// Mounts the root `node` and its subtree, and registers it with the
    /// scheduler.
    ///
    /// Dirty bits already pending in the subtree are requested again, so a
    /// tree built while unmounted gets its first pass scheduled here.
    pub fn mount(&mut self, node: NodeId) -> Result<(), ModelError> {
        let data = self.node(node)?;
        if data.parent.is_some() {
            return Err(ModelError::HasParent(node));
        }
        if data.flags.contains(Flags::MOUNTED) {
            return Err(ModelError::AlreadyMounted(node));
        }
        tracing::debug!(?node, "mount root");
        self.scheduler.register_root(node);
        self.cascade_mount(node)
    }

    /// Unmounts the root `node` and its subtree, and unregisters it from the
    /// scheduler.
    pub fn unmount(&mut self, node: NodeId) -> Result<(), ModelError> {
        let data = self.node(node)?;
        if data.parent.is_some() {
            return Err(ModelError::HasParent(node));
        }
        if !data.flags.contains(Flags::MOUNTED) {
            return Err(ModelError::AlreadyUnmounted(node));
        }
        tracing::debug!(?node, "unmount root");
        let result = self.cascade_unmount(node);
        self.scheduler.unregister_root(node);
        result
    }

    pub(crate) fn cascade_mount(&mut self, node: NodeId) -> Result<(), ModelError> {
        self.notify(node, |observer| observer.will_mount(node));
        self.node_mut(node)?.flags.insert(Flags::MOUNTED);

        let aspects: SmallVec<[AspectId; 4]> = self.node(node)?.aspects.iter().copied().collect();
        for aspect in aspects {
            let unmounted = self
                .aspects
                .get(aspect)
                .is_some_and(|data| data.owner == Some(node) && !data.flags.contains(AspectFlags::MOUNTED));
            if unmounted {
                self.mount_aspect(node, aspect)?;
            }
        }

        let children: SmallVec<[NodeId; 8]> = self.node(node)?.children.iter().copied().collect();
        for child in children {
            if self.parent(child) == Some(node) && !self.is_mounted(child) {
                self.cascade_mount(child)?;
            }
        }

        let pending = self.node(node)?.flags.dirty();
        if !pending.is_empty() {
            self.request_update(node, node, pending, false)?;
        }
        self.notify(node, |observer| observer.did_mount(node));
        Ok(())
    }

    pub(crate) fn cascade_unmount(&mut self, node: NodeId) -> Result<(), ModelError> {
        self.notify(node, |observer| observer.will_unmount(node));

        let children: SmallVec<[NodeId; 8]> = self.node(node)?.children.iter().copied().collect();
        for child in children {
            if self.parent(child) == Some(node) && self.is_mounted(child) {
                self.cascade_unmount(child)?;
            }
        }

        let aspects: SmallVec<[AspectId; 4]> = self.node(node)?.aspects.iter().copied().collect();
        for aspect in aspects.into_iter().rev() {
            let mounted = self
                .aspects
                .get(aspect)
                .is_some_and(|data| data.owner == Some(node) && data.flags.contains(AspectFlags::MOUNTED));
            if mounted {
                self.unmount_aspect(node, aspect)?;
            }
        }

        self.node_mut(node)?.flags.remove(Flags::MOUNTED);
        self.notify(node, |observer| observer.did_unmount(node));
        Ok(())
    }

    pub(crate) fn mount_aspect(&mut self, node: NodeId, aspect: AspectId) -> Result<(), ModelError> {
        if let Some(result) = self.with_aspect(aspect, |a, tree| a.will_mount(tree, node)) {
            result?;
        }
        if let Some(data) = self.aspects.get_mut(aspect) {
            data.flags.insert(AspectFlags::MOUNTED);
        }
        self.with_aspect(aspect, |a, tree| a.did_mount(tree, node))
            .unwrap_or(Ok(()))
    }

    pub(crate) fn unmount_aspect(&mut self, node: NodeId, aspect: AspectId) -> Result<(), ModelError> {
        if let Some(result) = self.with_aspect(aspect, |a, tree| a.will_unmount(tree, node)) {
            result?;
        }
        if let Some(data) = self.aspects.get_mut(aspect) {
            data.flags.remove(AspectFlags::MOUNTED);
        }
        self.with_aspect(aspect, |a, tree| a.did_unmount(tree, node))
            .unwrap_or(Ok(()))
    }

    /// Adds a consumer to `node`.
    ///
    /// The first consumer sets [`Flags::CONSUMING`] and starts consumption on
    /// every attached aspect.
    pub fn consume(&mut self, node: NodeId) -> Result<(), ModelError> {
        let data = self.node_mut(node)?;
        data.consumers += 1;
        if data.consumers > 1 {
            return Ok(());
        }
        data.flags.insert(Flags::CONSUMING);
        let aspects: SmallVec<[AspectId; 4]> = data.aspects.iter().copied().collect();
        for aspect in aspects {
            if self.is_attached_to(aspect, node) {
                self.start_consuming_aspect(node, aspect)?;
            }
        }
        Ok(())
    }

    /// Removes a consumer from `node`. Returns `false` if it had none.
    ///
    /// The last consumer clears [`Flags::CONSUMING`] and stops consumption
    /// on every attached aspect.
    pub fn unconsume(&mut self, node: NodeId) -> Result<bool, ModelError> {
        let data = self.node_mut(node)?;
        if data.consumers == 0 {
            return Ok(false);
        }
        data.consumers -= 1;
        if data.consumers > 0 {
            return Ok(true);
        }
        data.flags.remove(Flags::CONSUMING);
        let aspects: SmallVec<[AspectId; 4]> = data.aspects.iter().copied().collect();
        for aspect in aspects {
            let consuming = self
                .aspects
                .get(aspect)
                .is_some_and(|data| data.owner == Some(node) && data.flags.contains(AspectFlags::CONSUMING));
            if consuming {
                self.stop_consuming_aspect(node, aspect)?;
            }
        }
        Ok(true)
    }

    /// Returns the number of consumers of `node`.
    #[must_use]
    pub fn consumer_count(&self, node: NodeId) -> usize {
        self.nodes.get(node).map_or(0, |data| data.consumers)
    }

    pub(crate) fn start_consuming_aspect(
        &mut self,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        if let Some(data) = self.aspects.get_mut(aspect) {
            data.flags.insert(AspectFlags::CONSUMING);
        }
        self.with_aspect(aspect, |a, tree| a.start_consuming(tree, node))
            .unwrap_or(Ok(()))
    }

    pub(crate) fn stop_consuming_aspect(
        &mut self,
        node: NodeId,
        aspect: AspectId,
    ) -> Result<(), ModelError> {
        if let Some(data) = self.aspects.get_mut(aspect) {
            data.flags.remove(AspectFlags::CONSUMING);
        }
        self.with_aspect(aspect, |a, tree| a.stop_consuming(tree, node))
            .unwrap_or(Ok(()))
    }
}
