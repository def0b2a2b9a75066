// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Per-node storage and read accessors.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::binding::Binding;
use crate::context::ModelContext;
use crate::flags::{Flags, Pass};
use crate::id::{AspectId, NodeId, ObserverId};
use crate::observer::Observer;
use crate::tree::Tree;

/// Arena entry for one node.
pub(crate) struct NodeData<X: ModelContext> {
    /// Key under the current parent.
    pub(crate) key: Option<String>,
    /// Key used when the node is inserted without one.
    pub(crate) default_key: Option<String>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: Vec<NodeId>,
    pub(crate) children_by_key: HashMap<String, NodeId>,
    pub(crate) aspects: Vec<AspectId>,
    pub(crate) aspects_by_key: HashMap<String, AspectId>,
    pub(crate) flags: Flags,
    /// Fine dirty bits some descendant still needs.
    pub(crate) below: Flags,
    pub(crate) bindings: Vec<Binding>,
    /// Indices into `bindings`, in the order they went stale.
    pub(crate) decoherent: SmallVec<[usize; 2]>,
    pub(crate) observers: Vec<(ObserverId, Box<dyn Observer<X>>)>,
    pub(crate) consumers: usize,
}

impl<X: ModelContext> NodeData<X> {
    pub(crate) fn new(default_key: Option<String>) -> Self {
        Self {
            key: None,
            default_key,
            parent: None,
            children: Vec::new(),
            children_by_key: HashMap::new(),
            aspects: Vec::new(),
            aspects_by_key: HashMap::new(),
            flags: Flags::empty(),
            below: Flags::empty(),
            bindings: Vec::new(),
            decoherent: SmallVec::new(),
            observers: Vec::new(),
            consumers: 0,
        }
    }

    /// Dirty bits of `pass` on this node, plus the fine ones needed below it.
    pub(crate) fn pending(&self, pass: Pass) -> Flags {
        (self.flags & pass.mask()) | (self.below & pass.fine())
    }

    /// Every dirty bit of the subtree rooted here.
    pub(crate) fn subtree_dirty(&self) -> Flags {
        self.flags.dirty() | self.below
    }
}

impl<X: ModelContext> fmt::Debug for NodeData<X> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeData")
            .field("key", &self.key)
            .field("default_key", &self.default_key)
            .field("parent", &self.parent)
            .field("children", &self.children)
            .field("aspects", &self.aspects)
            .field("flags", &self.flags)
            .field("below", &self.below)
            .field("bindings", &self.bindings)
            .field("decoherent", &self.decoherent)
            .field("observers", &self.observers.len())
            .field("consumers", &self.consumers)
            .finish_non_exhaustive()
    }
}

impl<X: ModelContext> Tree<X> {
    /// Returns `true` if `node` refers to a live node.
    #[must_use]
    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node)
    }

    /// Returns the number of live nodes, attached or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the parent of `node`.
    #[must_use]
    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node)?.parent
    }

    /// Returns the children of `node` in order.
    ///
    /// Stale handles have no children.
    #[must_use]
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|data| data.children.as_slice())
            .unwrap_or_default()
    }

    /// Returns the child of `node` inserted under `key`.
    #[must_use]
    pub fn child(&self, node: NodeId, key: &str) -> Option<NodeId> {
        self.nodes.get(node)?.children_by_key.get(key).copied()
    }

    /// Returns the key `node` is stored under in its parent.
    ///
    /// Detached nodes have no key, even if they were created with one.
    #[must_use]
    pub fn key(&self, node: NodeId) -> Option<&str> {
        self.nodes.get(node)?.key.as_deref()
    }

    /// Returns the status and dirty bits of `node`.
    #[must_use]
    pub fn flags(&self, node: NodeId) -> Option<Flags> {
        Some(self.nodes.get(node)?.flags)
    }

    /// Returns `true` if `node` is mounted.
    #[must_use]
    pub fn is_mounted(&self, node: NodeId) -> bool {
        self.flags(node)
            .is_some_and(|flags| flags.contains(Flags::MOUNTED))
    }

    /// Returns `true` if `node` has at least one consumer.
    #[must_use]
    pub fn is_consuming(&self, node: NodeId) -> bool {
        self.flags(node)
            .is_some_and(|flags| flags.contains(Flags::CONSUMING))
    }

    /// Returns the aspects attached to `node`, in attachment order.
    #[must_use]
    pub fn aspects(&self, node: NodeId) -> &[AspectId] {
        self.nodes
            .get(node)
            .map(|data| data.aspects.as_slice())
            .unwrap_or_default()
    }

    /// Returns the aspect attached to `node` under `key`.
    #[must_use]
    pub fn aspect(&self, node: NodeId, key: &str) -> Option<AspectId> {
        self.nodes.get(node)?.aspects_by_key.get(key).copied()
    }

    /// Returns the ancestors of `node`, nearest first.
    pub fn ancestors(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        core::iter::successors(self.parent(node), move |&n| self.parent(n))
    }

    /// Returns `true` if `ancestor` is `node` or one of its ancestors.
    #[must_use]
    pub fn is_ancestor_or_self(&self, ancestor: NodeId, node: NodeId) -> bool {
        node == ancestor || self.ancestors(node).any(|n| n == ancestor)
    }

    /// Returns the root of the tree `node` belongs to.
    #[must_use]
    pub fn root_of(&self, node: NodeId) -> NodeId {
        self.ancestors(node).last().unwrap_or(node)
    }

    /// Checks the structural invariants of every live node.
    ///
    /// - Every child's parent link points back at the node that lists it.
    /// - The key maps agree with the children and aspects lists.
    /// - Every aspect in a node's list is owned by that node.
    /// - A mounted node has a mounted parent, if it has a parent at all.
    /// - No node is its own ancestor.
    ///
    /// Intended for tests and debug assertions.
    #[must_use]
    pub fn validate(&self) -> bool {
        self.nodes.iter().all(|(id, data)| {
            let children_ok = data.children.iter().all(|&child| {
                self.nodes.get(child).is_some_and(|c| c.parent == Some(id))
            });
            let child_keys_ok = data.children_by_key.len()
                == data.children.iter().filter(|&&c| self.key(c).is_some()).count()
                && data
                    .children_by_key
                    .iter()
                    .all(|(k, &c)| data.children.contains(&c) && self.key(c) == Some(k.as_str()));
            let aspects_ok = data.aspects.iter().all(|&a| {
                self.aspects.get(a).is_some_and(|aspect| aspect.owner == Some(id))
            });
            let aspect_keys_ok = data.aspects_by_key.iter().all(|(k, &a)| {
                data.aspects.contains(&a) && self.aspect_key(a) == Some(k.as_str())
            });
            let parent_ok = data.parent.is_none_or(|p| {
                self.nodes.get(p).is_some_and(|pd| {
                    pd.children.contains(&id)
                        && (!data.flags.contains(Flags::MOUNTED)
                            || pd.flags.contains(Flags::MOUNTED))
                })
            });
            let acyclic = self
                .ancestors(id)
                .take(self.nodes.len() + 1)
                .all(|a| a != id);
            children_ok && child_keys_ok && aspects_ok && aspect_keys_ok && parent_ok && acyclic
        })
    }
}
