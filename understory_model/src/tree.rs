// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tree: node and aspect arenas plus the scheduler that drives them.

use alloc::boxed::Box;
use core::fmt;

use smallvec::SmallVec;
use understory_timing::{Clock, ManualClock};

use crate::aspect::{Aspect, AspectData};
use crate::context::{ModelContext, UpdateContext};
use crate::error::ModelError;
use crate::id::{AspectId, NodeId, ObserverId, Slots};
use crate::node::NodeData;
use crate::observer::Observer;
use crate::scheduler::{SchedulerConfig, UpdateScheduler};

/// A forest of nodes with attached aspects, and the scheduler that keeps
/// them up to date.
///
/// Nodes and aspects live in arenas owned by the tree and are addressed by
/// [`NodeId`] and [`AspectId`]. A node created with
/// [`create_node`](Self::create_node) is a detached root until it is
/// inserted under a parent; a root becomes live with [`mount`](Self::mount).
///
/// `X` is the context type threaded through every pass. It defaults to
/// [`UpdateContext`]; use [`with_context`](Self::with_context) to supply a
/// factory for a richer one.
pub struct Tree<X: ModelContext = UpdateContext> {
    pub(crate) nodes: Slots<NodeId, NodeData<X>>,
    pub(crate) aspects: Slots<AspectId, AspectData<X>>,
    pub(crate) scheduler: UpdateScheduler,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) context_factory: Box<dyn FnMut(u64) -> X>,
    next_observer: u64,
}

impl Tree {
    /// Creates an empty tree with the default configuration and a
    /// [`ManualClock`] starting at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default(), ManualClock::new())
    }

    /// Creates an empty tree with the given scheduler configuration and clock.
    pub fn with_config(config: SchedulerConfig, clock: impl Clock + 'static) -> Self {
        Self::with_context(config, clock, UpdateContext::new)
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

impl<X: ModelContext> Tree<X> {
    /// Creates an empty tree whose passes build their context with `factory`.
    ///
    /// The factory receives the pass's update time, which never decreases
    /// from one pass to the next.
    pub fn with_context(
        config: SchedulerConfig,
        clock: impl Clock + 'static,
        factory: impl FnMut(u64) -> X + 'static,
    ) -> Self {
        Self {
            nodes: Slots::new(),
            aspects: Slots::new(),
            scheduler: UpdateScheduler::new(config),
            clock: Box::new(clock),
            context_factory: Box::new(factory),
            next_observer: 0,
        }
    }

    pub(crate) fn node(&self, node: NodeId) -> Result<&NodeData<X>, ModelError> {
        self.nodes.get(node).ok_or(ModelError::StaleNode(node))
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> Result<&mut NodeData<X>, ModelError> {
        self.nodes.get_mut(node).ok_or(ModelError::StaleNode(node))
    }

    pub(crate) fn aspect_data(&self, aspect: AspectId) -> Result<&AspectData<X>, ModelError> {
        self.aspects
            .get(aspect)
            .ok_or(ModelError::StaleAspect(aspect))
    }

    /// Takes an aspect's behavior out of its slot.
    ///
    /// Returns `None` if the aspect is stale or already checked out.
    pub(crate) fn checkout(&mut self, aspect: AspectId) -> Option<Box<dyn Aspect<X>>> {
        self.aspects.get_mut(aspect)?.behavior.take()
    }

    /// Returns a checked-out behavior to its slot. If the aspect was
    /// disposed in the meantime the behavior is dropped.
    pub(crate) fn checkin(&mut self, aspect: AspectId, behavior: Box<dyn Aspect<X>>) {
        if let Some(data) = self.aspects.get_mut(aspect) {
            data.behavior = Some(behavior);
        }
    }

    /// Runs `f` with `aspect` checked out. `None` if it could not be checked out.
    pub(crate) fn with_aspect<R>(
        &mut self,
        aspect: AspectId,
        f: impl FnOnce(&mut dyn Aspect<X>, &mut Self) -> R,
    ) -> Option<R> {
        let mut behavior = self.checkout(aspect)?;
        let result = f(behavior.as_mut(), self);
        self.checkin(aspect, behavior);
        Some(result)
    }

    /// Returns `true` if `aspect` is currently attached to `node`.
    pub(crate) fn is_attached_to(&self, aspect: AspectId, node: NodeId) -> bool {
        self.aspects
            .get(aspect)
            .is_some_and(|data| data.owner == Some(node))
    }

    /// Runs `f` on every aspect of `node` except `skip`, in attachment order.
    ///
    /// The list is snapshotted first. Aspects that leave `node` before their
    /// turn, or that are checked out, are skipped.
    pub(crate) fn each_aspect(
        &mut self,
        node: NodeId,
        skip: Option<AspectId>,
        mut f: impl FnMut(&mut dyn Aspect<X>, &mut Self) -> Result<(), ModelError>,
    ) -> Result<(), ModelError> {
        let snapshot: SmallVec<[AspectId; 4]> = match self.nodes.get(node) {
            Some(data) => data.aspects.iter().copied().collect(),
            None => return Ok(()),
        };
        for aspect in snapshot {
            if Some(aspect) == skip || !self.is_attached_to(aspect, node) {
                continue;
            }
            if let Some(result) = self.with_aspect(aspect, &mut f) {
                result?;
            }
        }
        Ok(())
    }

    /// Calls `f` on every observer of `node`, in registration order.
    pub(crate) fn notify(&mut self, node: NodeId, mut f: impl FnMut(&mut dyn Observer<X>)) {
        if let Some(data) = self.nodes.get_mut(node) {
            for (_, observer) in &mut data.observers {
                f(observer.as_mut());
            }
        }
    }

    /// Registers `observer` on `node`.
    pub fn observe(
        &mut self,
        node: NodeId,
        observer: impl Observer<X> + 'static,
    ) -> Result<ObserverId, ModelError> {
        let id = ObserverId(self.next_observer);
        self.node_mut(node)?
            .observers
            .push((id, Box::new(observer)));
        self.next_observer += 1;
        Ok(id)
    }

    /// Removes a previously registered observer. Returns `false` if it was
    /// not registered on `node`.
    pub fn unobserve(&mut self, node: NodeId, observer: ObserverId) -> bool {
        let Some(data) = self.nodes.get_mut(node) else {
            return false;
        };
        let before = data.observers.len();
        data.observers.retain(|(id, _)| *id != observer);
        data.observers.len() != before
    }

    /// Returns the current time of the tree's clock, in milliseconds.
    #[must_use]
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    /// Returns the update scheduler.
    #[must_use]
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }
}

impl<X: ModelContext> fmt::Debug for Tree<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("nodes", &self.nodes.len())
            .field("aspects", &self.aspects.len())
            .field("scheduler", &self.scheduler)
            .field("now", &self.clock.now())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flags::Phase;

    #[derive(Default)]
    struct Log(alloc::rc::Rc<core::cell::RefCell<alloc::vec::Vec<NodeId>>>);

    impl Observer for Log {
        fn will_phase(&mut self, node: NodeId, _phase: Phase, _cx: &UpdateContext) {
            self.0.borrow_mut().push(node);
        }
    }

    #[test]
    fn observers_register_and_unregister() {
        let mut tree = Tree::new();
        let node = tree.create_node();
        let id = tree.observe(node, Log::default()).unwrap();
        assert!(tree.unobserve(node, id));
        assert!(!tree.unobserve(node, id));
    }

    #[test]
    fn observe_rejects_stale_nodes() {
        let mut tree = Tree::new();
        let node = tree.create_node();
        tree.dispose(node).unwrap();
        assert!(matches!(
            tree.observe(node, Log::default()),
            Err(ModelError::StaleNode(n)) if n == node
        ));
    }

    #[test]
    fn clock_is_shared_with_the_caller() {
        let clock = ManualClock::new();
        let tree = Tree::with_config(SchedulerConfig::default(), clock.clone());
        clock.advance(42);
        assert_eq!(tree.now(), 42);
    }
}
