// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The analyze and refresh traversals.
//!
//! A pass enters a node only if the node (or something below it) carries a
//! dirty bit of the pass. On entry the coarse bit is cleared and the node is
//! marked [`TRAVERSING`](Flags::TRAVERSING). The node then runs, in order:
//!
//! 1. `will` of the envelope phase.
//! 2. For each sub-phase needed by the node or by a node below it: `will`,
//!    `on`, a children walk for that sub-phase, `did`. The children walk
//!    only descends into children whose subtree needs the sub-phase, and
//!    finishes it there before the next sub-phase starts.
//! 3. `on` of the envelope phase.
//! 4. The envelope children walk, which enters every dirty child in turn.
//! 5. `did` of the envelope phase.
//!
//! The status bits set on entry are released on every exit path, including
//! errors returned by hooks. On the way out the node settles what is left:
//! work an aspect held back or a walk skipped is requested again, and a
//! coarse bit with nothing left behind it is dropped.

use smallvec::SmallVec;

use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::{Flags, Pass, Phase};
use crate::id::{AspectId, NodeId};
use crate::tree::Tree;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Step {
    Will,
    On,
    Did,
}

/// A children walk in progress, handed to
/// [`Aspect::analyze_children`](crate::Aspect::analyze_children) and
/// [`Aspect::refresh_children`](crate::Aspect::refresh_children).
///
/// The walk belongs to one node and one [`Phase`]. Aspects of the node wrap
/// it in attachment order; [`proceed`](Self::proceed) hands control to the
/// next aspect, and past the last one to the default walk, which visits each
/// child carrying a dirty bit of the pass.
pub struct ChildWalk<'a, X: ModelContext> {
    tree: &'a mut Tree<X>,
    node: NodeId,
    phase: Phase,
    cx: &'a X,
    chain: SmallVec<[AspectId; 4]>,
    depth: usize,
}

impl<X: ModelContext> core::fmt::Debug for ChildWalk<'_, X> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChildWalk")
            .field("node", &self.node)
            .field("phase", &self.phase)
            .field("chain", &self.chain)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl<X: ModelContext> ChildWalk<'_, X> {
    /// The node whose children are being walked.
    #[must_use]
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The phase the walk belongs to. Envelope phases enter children for the
    /// whole pass; sub-phases run only that sub-phase on them.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The pass context.
    #[must_use]
    pub fn context(&self) -> &X {
        self.cx
    }

    /// Read access to the tree.
    #[must_use]
    pub fn tree(&self) -> &Tree<X> {
        &*self.tree
    }

    /// Mutable access to the tree, for example to require updates on
    /// children before visiting them.
    pub fn tree_mut(&mut self) -> &mut Tree<X> {
        &mut *self.tree
    }

    /// The children of the walked node, as they are right now.
    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        self.tree.children(self.node)
    }

    /// Continues the walk with the next aspect in the chain, or with the
    /// default walk if every aspect has had its turn.
    ///
    /// Fine bits in `flags` are forced onto every child the walk visits. The
    /// node's own walk starts without any.
    pub fn proceed(&mut self, flags: Flags) -> Result<(), ModelError> {
        let start = self.depth;
        let mut next = start;
        while let Some(&aspect) = self.chain.get(next) {
            next += 1;
            if !self.tree.is_attached_to(aspect, self.node) {
                continue;
            }
            let Some(mut behavior) = self.tree.checkout(aspect) else {
                continue;
            };
            self.depth = next;
            let result = match self.phase.pass() {
                Pass::Analyze => behavior.analyze_children(self, flags),
                Pass::Refresh => behavior.refresh_children(self, flags),
            };
            self.depth = start;
            self.tree.checkin(aspect, behavior);
            return result;
        }
        self.walk(flags)
    }

    /// Visits one child, whether or not it is dirty, forcing the fine bits
    /// of `flags` onto it.
    ///
    /// Fails with [`ModelError::NotAChild`] if `child` is not a child of the
    /// walked node.
    pub fn visit(&mut self, child: NodeId, flags: Flags) -> Result<(), ModelError> {
        if self.tree.parent(child) != Some(self.node) {
            return Err(ModelError::NotAChild {
                parent: self.node,
                child,
            });
        }
        self.visit_child(child, flags)
    }

    /// The default walk. The envelope walk visits every child with a dirty
    /// bit of the pass; a sub-phase walk visits the children that need the
    /// sub-phase themselves or somewhere below.
    ///
    /// The index only advances while the visited child is still in place,
    /// so a child removed during its own visit lets its successor slide in
    /// and be visited next.
    fn walk(&mut self, flags: Flags) -> Result<(), ModelError> {
        let pass = self.phase.pass();
        let wanted = if self.phase.is_envelope() {
            pass.mask()
        } else {
            self.phase.flag()
        };
        let envelope = self.phase.is_envelope();
        let forced = flags.intersects(wanted & pass.fine());
        let mut index = 0;
        while let Some(&child) = self.tree.children(self.node).get(index) {
            let dirty = self.tree.nodes.get(child).is_some_and(|data| {
                let needs = if envelope {
                    data.flags & pass.mask()
                } else {
                    data.pending(pass)
                };
                forced || needs.intersects(wanted)
            });
            if dirty {
                self.visit_child(child, flags)?;
            }
            if self.tree.children(self.node).get(index) == Some(&child) {
                index += 1;
            }
        }
        Ok(())
    }

    fn visit_child(&mut self, child: NodeId, flags: Flags) -> Result<(), ModelError> {
        let result = if self.phase.is_envelope() {
            self.tree.cascade(self.phase.pass(), child, flags, self.cx)
        } else {
            self.tree.cascade_sub_phase(child, self.phase, flags, self.cx)
        };
        let removing = self
            .tree
            .flags(child)
            .is_some_and(|f| f.contains(Flags::REMOVING));
        if removing && self.tree.parent(child) == Some(self.node) {
            self.tree.remove_child(self.node, child)?;
        }
        result
    }
}

impl<X: ModelContext> Tree<X> {
    /// Runs the analyze pass on `node` and its dirty descendants.
    ///
    /// `flags` carries fine analyze bits inherited from above: they run
    /// their sub-phase on `node` even if nothing in its subtree asked for
    /// them. They are not handed on to children. The scheduler calls this
    /// on each dirty root with no extra bits; calling it directly is useful
    /// for driving a subtree by hand.
    ///
    /// Fails with [`ModelError::AlreadyTraversing`] if a pass is already
    /// visiting `node`.
    pub fn cascade_analyze(&mut self, node: NodeId, flags: Flags, cx: &X) -> Result<(), ModelError> {
        let result = self.cascade(Pass::Analyze, node, flags, cx);
        self.finish_removal(node)?;
        result
    }

    /// Runs the refresh pass on `node` and its dirty descendants.
    ///
    /// See [`cascade_analyze`](Self::cascade_analyze).
    pub fn cascade_refresh(&mut self, node: NodeId, flags: Flags, cx: &X) -> Result<(), ModelError> {
        let result = self.cascade(Pass::Refresh, node, flags, cx);
        self.finish_removal(node)?;
        result
    }

    /// Completes a removal deferred while `node` was visited outside of its
    /// parent's walk.
    fn finish_removal(&mut self, node: NodeId) -> Result<(), ModelError> {
        let Some(data) = self.nodes.get(node) else {
            return Ok(());
        };
        let Some(parent) = data.parent else {
            return Ok(());
        };
        if data.flags.contains(Flags::REMOVING) && !self.node(parent)?.flags.contains(Flags::TRAVERSING) {
            self.remove_child(parent, node)?;
        }
        Ok(())
    }

    /// Enters `node` for a whole pass.
    pub(crate) fn cascade(
        &mut self,
        pass: Pass,
        node: NodeId,
        inherited: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        let data = self.node(node)?;
        if data.flags.contains(Flags::TRAVERSING) {
            return Err(ModelError::AlreadyTraversing(node));
        }
        let mut flags = (inherited & pass.fine()) | data.pending(pass);
        flags = self.filter_pass(pass, node, flags, cx);
        if !flags.intersects(pass.mask()) {
            return Ok(());
        }
        tracing::trace!(?node, %pass, ?flags, "enter node");

        let data = self.node_mut(node)?;
        data.flags.remove(pass.coarse());
        data.flags.insert(Flags::TRAVERSING | pass.status() | Flags::CONTEXTUAL);
        let result = self.envelope(pass, node, flags, cx);
        self.release(pass.phase(), node)?;
        result
    }

    /// Visits `node` for a single sub-phase from its parent's sub-phase walk.
    ///
    /// The aspects of `node` may hold the sub-phase back. The node is then
    /// skipped with its bits intact, and the envelope walk enters it later
    /// in the same pass, where the held back bits are requested again.
    pub(crate) fn cascade_sub_phase(
        &mut self,
        node: NodeId,
        phase: Phase,
        inherited: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        let pass = phase.pass();
        let data = self.node(node)?;
        if data.flags.contains(Flags::TRAVERSING) {
            return Err(ModelError::AlreadyTraversing(node));
        }
        let mut flags = (inherited & pass.fine()) | data.pending(pass);
        flags = self.filter_pass(pass, node, flags, cx);
        if !flags.contains(phase.flag()) {
            tracing::trace!(?node, ?phase, ?flags, "sub-phase held back");
            return Ok(());
        }

        self.node_mut(node)?
            .flags
            .insert(Flags::TRAVERSING | pass.status() | Flags::CONTEXTUAL);
        let result = self.sub_phase(node, phase, flags, cx);
        self.release(phase, node)?;
        result
    }

    fn filter_pass(&mut self, pass: Pass, node: NodeId, flags: Flags, cx: &X) -> Flags {
        let aspects: SmallVec<[AspectId; 4]> = match self.nodes.get(node) {
            Some(data) => data.aspects.iter().copied().collect(),
            None => return flags,
        };
        let mut flags = flags;
        for aspect in aspects {
            if !self.is_attached_to(aspect, node) {
                continue;
            }
            let filtered = self.with_aspect(aspect, |a, tree| match pass {
                Pass::Analyze => a.needs_analyze(tree, node, flags, cx),
                Pass::Refresh => a.needs_refresh(tree, node, flags, cx),
            });
            if let Some(filtered) = filtered {
                flags = filtered & pass.mask();
            }
        }
        flags
    }

    fn envelope(&mut self, pass: Pass, node: NodeId, flags: Flags, cx: &X) -> Result<(), ModelError> {
        let envelope = pass.phase();
        self.phase_step(Step::Will, node, envelope, flags, cx)?;
        for &phase in pass.sub_phases() {
            if flags.contains(phase.flag()) {
                self.sub_phase(node, phase, flags, cx)?;
            }
        }
        self.phase_step(Step::On, node, envelope, flags, cx)?;
        self.walk_children(node, envelope, flags - pass.fine(), cx)?;
        self.phase_step(Step::Did, node, envelope, flags, cx)
    }

    fn sub_phase(&mut self, node: NodeId, phase: Phase, flags: Flags, cx: &X) -> Result<(), ModelError> {
        self.phase_step(Step::Will, node, phase, flags, cx)?;
        self.node_mut(node)?.flags.remove(phase.flag());
        match phase {
            Phase::Mutate => self.recohere(node, Pass::Analyze),
            Phase::Reconcile => self.recohere(node, Pass::Refresh),
            _ => {}
        }
        self.phase_step(Step::On, node, phase, flags, cx)?;
        self.walk_children(node, phase, flags - phase.pass().fine(), cx)?;
        self.phase_step(Step::Did, node, phase, flags, cx)
    }

    /// Clears the status bits set on entry and rebuilds the descendant
    /// bits of `node` from its children.
    ///
    /// After an envelope visit, whatever is still dirty on the node or in
    /// its subtree keeps the coarse bit: fine bits an aspect filtered out,
    /// children a walk decorator skipped, and work required during the pass
    /// after the walk went by. If the coarse bit is gone it is requested
    /// again so the next pass picks that work up. If nothing is left, a
    /// coarse bit set by a request the pass already served is dropped.
    fn release(&mut self, phase: Phase, node: NodeId) -> Result<(), ModelError> {
        let pass = phase.pass();
        let below = self.children_dirty(node);
        let Some(data) = self.nodes.get_mut(node) else {
            return Ok(());
        };
        data.flags
            .remove(Flags::TRAVERSING | pass.status() | Flags::CONTEXTUAL);
        data.below = below.fine();
        if !phase.is_envelope() {
            return Ok(());
        }
        let left = (data.flags & pass.fine()) | (below & pass.mask());
        if left.is_empty() {
            data.flags.remove(pass.coarse());
        } else if !data.flags.contains(pass.coarse()) {
            self.request_update(node, node, left, false)?;
        }
        Ok(())
    }

    fn phase_step(
        &mut self,
        step: Step,
        node: NodeId,
        phase: Phase,
        flags: Flags,
        cx: &X,
    ) -> Result<(), ModelError> {
        self.each_aspect(node, None, |aspect, tree| match step {
            Step::Will => aspect.will_phase(tree, node, phase, flags, cx),
            Step::On => aspect.on_phase(tree, node, phase, flags, cx),
            Step::Did => aspect.did_phase(tree, node, phase, flags, cx),
        })?;
        self.notify(node, |observer| match step {
            Step::Will => observer.will_phase(node, phase, cx),
            Step::On => observer.on_phase(node, phase, cx),
            Step::Did => observer.did_phase(node, phase, cx),
        });
        Ok(())
    }

    fn walk_children(&mut self, node: NodeId, phase: Phase, flags: Flags, cx: &X) -> Result<(), ModelError> {
        let Some(data) = self.nodes.get(node) else {
            return Ok(());
        };
        if data.children.is_empty() {
            return Ok(());
        }
        let chain = data.aspects.iter().copied().collect();
        let mut walk = ChildWalk {
            tree: self,
            node,
            phase,
            cx,
            chain,
            depth: 0,
        };
        walk.proceed(flags)
    }
}

#[cfg(test)]
mod tests {
    use alloc::rc::Rc;
    use alloc::vec::Vec;
    use core::cell::RefCell;

    use crate::{
        Aspect, ChildWalk, Flags, ModelError, NodeId, Observer, Pass, Phase, Tree, UpdateContext,
    };

    type Log = Rc<RefCell<Vec<(NodeId, Phase, &'static str)>>>;

    struct Trace(Log);

    impl Observer for Trace {
        fn will_phase(&mut self, node: NodeId, phase: Phase, _cx: &UpdateContext) {
            self.0.borrow_mut().push((node, phase, "will"));
        }

        fn on_phase(&mut self, node: NodeId, phase: Phase, _cx: &UpdateContext) {
            self.0.borrow_mut().push((node, phase, "on"));
        }

        fn did_phase(&mut self, node: NodeId, phase: Phase, _cx: &UpdateContext) {
            self.0.borrow_mut().push((node, phase, "did"));
        }
    }

    fn traced(tree: &mut Tree, log: &Log, nodes: &[NodeId]) {
        for &node in nodes {
            tree.observe(node, Trace(log.clone())).unwrap();
        }
    }

    #[test]
    fn sub_phases_complete_over_the_subtree_before_the_next_one() {
        let log = Log::default();
        let mut tree = Tree::new();
        let root = tree.create_node();
        let child = tree.create_node();
        tree.append_child(root, child, None).unwrap();
        traced(&mut tree, &log, &[root, child]);

        tree.require_update(child, Flags::NEEDS_MUTATE | Flags::NEEDS_CORRELATE, false)
            .unwrap();
        let cx = UpdateContext::new(0);
        tree.cascade_analyze(root, Flags::NEEDS_MUTATE | Flags::NEEDS_CORRELATE, &cx)
            .unwrap();

        let log = log.borrow();
        assert_eq!(
            *log,
            [
                (root, Phase::Analyze, "will"),
                (root, Phase::Mutate, "will"),
                (root, Phase::Mutate, "on"),
                (child, Phase::Mutate, "will"),
                (child, Phase::Mutate, "on"),
                (child, Phase::Mutate, "did"),
                (root, Phase::Mutate, "did"),
                (root, Phase::Correlate, "will"),
                (root, Phase::Correlate, "on"),
                (child, Phase::Correlate, "will"),
                (child, Phase::Correlate, "on"),
                (child, Phase::Correlate, "did"),
                (root, Phase::Correlate, "did"),
                (root, Phase::Analyze, "on"),
                (child, Phase::Analyze, "will"),
                (child, Phase::Analyze, "on"),
                (child, Phase::Analyze, "did"),
                (root, Phase::Analyze, "did"),
            ]
        );
        assert!(!tree.flags(root).unwrap().intersects(Flags::ANALYZE_MASK));
        assert!(!tree.flags(child).unwrap().intersects(Flags::ANALYZE_MASK));
    }

    #[test]
    fn status_bits_are_set_during_and_released_after() {
        struct Check;

        impl Aspect for Check {
            fn on_phase(
                &mut self,
                tree: &mut Tree,
                node: NodeId,
                _phase: Phase,
                _flags: Flags,
                _cx: &UpdateContext,
            ) -> Result<(), ModelError> {
                let flags = tree.flags(node).unwrap();
                assert!(
                    flags.contains(Flags::TRAVERSING | Flags::REFRESHING | Flags::CONTEXTUAL),
                    "status bits set while visiting"
                );
                Ok(())
            }
        }

        let mut tree = Tree::new();
        let node = tree.create_node();
        tree.insert_aspect(node, Check, None).unwrap();
        tree.require_update(node, Flags::NEEDS_RECONCILE, false).unwrap();
        tree.cascade_refresh(node, Flags::empty(), &UpdateContext::default())
            .unwrap();
        assert_eq!(tree.flags(node), Some(Flags::empty()));
    }

    #[test]
    fn clean_nodes_are_not_entered() {
        let log = Log::default();
        let mut tree = Tree::new();
        let node = tree.create_node();
        traced(&mut tree, &log, &[node]);
        tree.cascade_analyze(node, Flags::empty(), &UpdateContext::default())
            .unwrap();
        assert!(log.borrow().is_empty());

        // Bits handed in from above are work, even on a clean node.
        tree.cascade_analyze(node, Flags::NEEDS_MUTATE, &UpdateContext::default())
            .unwrap();
        assert!(log.borrow().contains(&(node, Phase::Mutate, "on")));
    }

    #[test]
    fn reentering_a_traversing_node_fails() {
        struct Reenter;

        impl Aspect for Reenter {
            fn on_phase(
                &mut self,
                tree: &mut Tree,
                node: NodeId,
                phase: Phase,
                _flags: Flags,
                cx: &UpdateContext,
            ) -> Result<(), ModelError> {
                if phase == Phase::Mutate {
                    tree.cascade_analyze(node, Flags::NEEDS_MUTATE, cx)?;
                }
                Ok(())
            }
        }

        let mut tree = Tree::new();
        let node = tree.create_node();
        tree.insert_aspect(node, Reenter, None).unwrap();
        tree.require_update(node, Flags::NEEDS_MUTATE, false).unwrap();
        let err = tree
            .cascade_analyze(node, Flags::empty(), &UpdateContext::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::AlreadyTraversing(n) if n == node));
        let flags = tree.flags(node).unwrap();
        assert!(!flags.intersects(Flags::TRAVERSING | Flags::ANALYZING | Flags::CONTEXTUAL));
    }

    #[test]
    fn hook_errors_unwind_and_release() {
        #[derive(Debug)]
        struct Boom;

        impl core::fmt::Display for Boom {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str("boom")
            }
        }

        impl core::error::Error for Boom {}

        struct Fail;

        impl Aspect for Fail {
            fn on_phase(
                &mut self,
                _tree: &mut Tree,
                _node: NodeId,
                phase: Phase,
                _flags: Flags,
                _cx: &UpdateContext,
            ) -> Result<(), ModelError> {
                if phase == Phase::Validate {
                    return Err(ModelError::callback(Boom));
                }
                Ok(())
            }
        }

        let mut tree = Tree::new();
        let root = tree.create_node();
        let child = tree.create_node();
        tree.append_child(root, child, None).unwrap();
        tree.insert_aspect(child, Fail, None).unwrap();
        tree.require_update(child, Flags::NEEDS_VALIDATE, false).unwrap();

        let err = tree
            .cascade_refresh(root, Flags::empty(), &UpdateContext::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::Callback(_)));
        for node in [root, child] {
            let flags = tree.flags(node).unwrap();
            assert!(!flags.intersects(Flags::TRAVERSING | Flags::REFRESHING | Flags::CONTEXTUAL));
        }
    }

    /// Visits only the first child, for the envelope step only.
    struct FirstOnly;

    impl Aspect for FirstOnly {
        fn analyze_children(
            &mut self,
            walk: &mut ChildWalk<'_, UpdateContext>,
            flags: Flags,
        ) -> Result<(), ModelError> {
            if !walk.phase().is_envelope() {
                return walk.proceed(flags);
            }
            if let Some(&first) = walk.children().first() {
                walk.visit(first, flags)?;
            }
            Ok(())
        }
    }

    #[test]
    fn aspects_can_prune_the_children_walk() {
        let log = Log::default();
        let mut tree = Tree::new();
        let root = tree.create_node();
        let a = tree.create_node();
        let b = tree.create_node();
        tree.append_child(root, a, None).unwrap();
        tree.append_child(root, b, None).unwrap();
        tree.insert_aspect(root, FirstOnly, None).unwrap();
        traced(&mut tree, &log, &[a, b]);

        tree.require_update(a, Flags::NEEDS_ANALYZE, false).unwrap();
        tree.require_update(b, Flags::NEEDS_ANALYZE, false).unwrap();
        tree.cascade_analyze(root, Flags::empty(), &UpdateContext::default())
            .unwrap();

        assert!(log.borrow().iter().all(|&(node, _, _)| node == a));
        assert!(tree.flags(b).unwrap().contains(Flags::NEEDS_ANALYZE));
        assert!(!tree.flags(a).unwrap().contains(Flags::NEEDS_ANALYZE));
        // The skipped child keeps its parent dirty.
        assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_ANALYZE));
    }

    #[test]
    fn pruned_children_reach_the_next_pass() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        let a = tree.create_node();
        let b = tree.create_node();
        tree.append_child(root, a, None).unwrap();
        tree.append_child(root, b, None).unwrap();
        tree.insert_aspect(root, FirstOnly, None).unwrap();
        tree.mount(root).unwrap();

        tree.require_update(b, Flags::NEEDS_ANALYZE, false).unwrap();
        tree.run_analyze_pass().unwrap();
        assert!(tree.flags(b).unwrap().contains(Flags::NEEDS_ANALYZE));
        assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_ANALYZE));
        assert!(tree.scheduler().flags().contains(Flags::NEEDS_ANALYZE));
        assert!(tree.scheduler().pending(Pass::Analyze).is_some());

        // A later request for the same work is not lost on the way up.
        tree.require_update(b, Flags::NEEDS_ANALYZE, false).unwrap();
        assert_eq!(tree.scheduler().pending_timers(), 1);
    }

    #[test]
    fn visiting_a_stranger_fails() {
        struct Stranger(NodeId);

        impl Aspect for Stranger {
            fn refresh_children(
                &mut self,
                walk: &mut ChildWalk<'_, UpdateContext>,
                flags: Flags,
            ) -> Result<(), ModelError> {
                walk.visit(self.0, flags)
            }
        }

        let mut tree = Tree::new();
        let root = tree.create_node();
        let child = tree.create_node();
        let stranger = tree.create_node();
        tree.append_child(root, child, None).unwrap();
        tree.insert_aspect(root, Stranger(stranger), None).unwrap();
        tree.require_update(root, Flags::NEEDS_REFRESH, false).unwrap();
        let err = tree
            .cascade_refresh(root, Flags::empty(), &UpdateContext::default())
            .unwrap_err();
        assert!(matches!(err, ModelError::NotAChild { child, .. } if child == stranger));
    }

    #[test]
    fn decorators_nest_in_attachment_order() {
        type Order = Rc<RefCell<Vec<&'static str>>>;

        struct Wrap(&'static str, Order);

        impl Aspect for Wrap {
            fn analyze_children(
                &mut self,
                walk: &mut ChildWalk<'_, UpdateContext>,
                flags: Flags,
            ) -> Result<(), ModelError> {
                self.1.borrow_mut().push(self.0);
                walk.proceed(flags)?;
                self.1.borrow_mut().push(self.0);
                Ok(())
            }
        }

        let order = Order::default();
        let mut tree = Tree::new();
        let root = tree.create_node();
        let child = tree.create_node();
        tree.append_child(root, child, None).unwrap();
        tree.insert_aspect(root, Wrap("outer", order.clone()), None).unwrap();
        tree.insert_aspect(root, Wrap("inner", order.clone()), None).unwrap();
        tree.require_update(child, Flags::NEEDS_ANALYZE, false).unwrap();
        tree.cascade_analyze(root, Flags::empty(), &UpdateContext::default())
            .unwrap();
        assert_eq!(*order.borrow(), ["outer", "inner", "inner", "outer"]);
    }

    /// Holds back Correlate on its owner.
    struct Defer;

    impl Aspect for Defer {
        fn needs_analyze(
            &mut self,
            _tree: &Tree,
            _node: NodeId,
            flags: Flags,
            _cx: &UpdateContext,
        ) -> Flags {
            flags - Flags::NEEDS_CORRELATE
        }
    }

    #[test]
    fn deferred_fine_bits_are_requested_again() {
        let mut tree = Tree::new();
        let node = tree.create_node();
        tree.insert_aspect(node, Defer, None).unwrap();
        tree.require_update(node, Flags::NEEDS_MUTATE | Flags::NEEDS_CORRELATE, false)
            .unwrap();
        tree.cascade_analyze(node, Flags::empty(), &UpdateContext::default())
            .unwrap();
        let flags = tree.flags(node).unwrap();
        assert!(!flags.contains(Flags::NEEDS_MUTATE));
        assert!(flags.contains(Flags::NEEDS_CORRELATE | Flags::NEEDS_ANALYZE));
        assert_eq!(Pass::Analyze.coarse(), Flags::NEEDS_ANALYZE);
    }

    #[test]
    fn children_can_hold_back_a_sub_phase() {
        let log = Log::default();
        let mut tree = Tree::new();
        let root = tree.create_node();
        let child = tree.create_node();
        tree.append_child(root, child, None).unwrap();
        tree.insert_aspect(child, Defer, None).unwrap();
        traced(&mut tree, &log, &[child]);

        tree.require_update(child, Flags::NEEDS_MUTATE | Flags::NEEDS_CORRELATE, false)
            .unwrap();
        tree.cascade_analyze(root, Flags::empty(), &UpdateContext::default())
            .unwrap();

        let log = log.borrow();
        assert!(log.contains(&(child, Phase::Mutate, "on")));
        assert!(log.iter().all(|&(_, phase, _)| phase != Phase::Correlate));
        let flags = tree.flags(child).unwrap();
        assert!(!flags.contains(Flags::NEEDS_MUTATE));
        assert!(flags.contains(Flags::NEEDS_CORRELATE | Flags::NEEDS_ANALYZE));
        assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_ANALYZE));
    }
}
