// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Named, lazily resolved links from a node to one of its keyed members.

use alloc::string::String;

use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::{Flags, Pass};
use crate::id::{AspectId, NodeId};
use crate::tree::Tree;

/// What kind of member a [`Binding`] resolves to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// A child inserted under the binding's name.
    Child,
    /// An aspect attached under the binding's name.
    Aspect,
}

/// The resolved value of a [`Binding`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingTarget {
    /// A child node.
    Child(NodeId),
    /// An attached aspect.
    Aspect(AspectId),
}

/// A named link from a node to the child or aspect stored under that name.
///
/// The cached value goes stale (the binding becomes *decoherent*) whenever a
/// member with the binding's name is inserted or removed. The owner is then
/// marked dirty for the binding's pass and the value is recomputed in the
/// next [`Phase::Mutate`](crate::Phase::Mutate) (analyze affinity) or
/// [`Phase::Reconcile`](crate::Phase::Reconcile) (refresh affinity), before
/// the node's aspects see that phase. [`Tree::resolve_binding`] forces
/// resolution at any time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    name: String,
    kind: BindingKind,
    affinity: Pass,
    value: Option<BindingTarget>,
    decoherent: bool,
}

impl Binding {
    /// Creates a binding to the child keyed `name`, recohered during analyze.
    pub fn child(name: impl Into<String>) -> Self {
        Self::new(name.into(), BindingKind::Child)
    }

    /// Creates a binding to the aspect keyed `name`, recohered during analyze.
    pub fn aspect(name: impl Into<String>) -> Self {
        Self::new(name.into(), BindingKind::Aspect)
    }

    fn new(name: String, kind: BindingKind) -> Self {
        Self {
            name,
            kind,
            affinity: Pass::Analyze,
            value: None,
            decoherent: false,
        }
    }

    /// Sets the pass during which the binding is recohered.
    #[must_use]
    pub fn with_affinity(mut self, affinity: Pass) -> Self {
        self.affinity = affinity;
        self
    }

    /// Returns the binding's name, which is also the member key it follows.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns what kind of member the binding follows.
    #[must_use]
    pub fn kind(&self) -> BindingKind {
        self.kind
    }

    /// Returns the pass during which the binding is recohered.
    #[must_use]
    pub fn affinity(&self) -> Pass {
        self.affinity
    }

    /// Returns the cached value, which may be stale.
    #[must_use]
    pub fn value(&self) -> Option<BindingTarget> {
        self.value
    }

    /// Returns `true` if the cached value is known to be stale.
    #[must_use]
    pub fn is_decoherent(&self) -> bool {
        self.decoherent
    }

    /// The dirty bit the owner carries while this binding is decoherent.
    #[must_use]
    pub fn required_flags(&self) -> Flags {
        match self.affinity {
            Pass::Analyze => Flags::NEEDS_MUTATE,
            Pass::Refresh => Flags::NEEDS_RECONCILE,
        }
    }
}

impl<X: ModelContext> Tree<X> {
    /// Adds `binding` to `node`, replacing any binding with the same name.
    ///
    /// The new binding starts out decoherent, so it resolves in the next
    /// pass of its affinity (or on the first [`resolve_binding`](Self::resolve_binding)).
    pub fn bind(&mut self, node: NodeId, binding: Binding) -> Result<(), ModelError> {
        let data = self.node_mut(node)?;
        let index = match data.bindings.iter().position(|b| b.name == binding.name) {
            Some(index) => {
                data.bindings[index] = binding;
                data.decoherent.retain(|&mut i| i != index);
                index
            }
            None => {
                data.bindings.push(binding);
                data.bindings.len() - 1
            }
        };
        self.decohere_at(node, index)
    }

    /// Returns the binding named `name` on `node`.
    #[must_use]
    pub fn binding(&self, node: NodeId, name: &str) -> Option<&Binding> {
        self.nodes
            .get(node)?
            .bindings
            .iter()
            .find(|b| b.name == name)
    }

    /// Returns the bindings of `node` that are waiting for recoherence, in queue order.
    pub fn decoherent_bindings(&self, node: NodeId) -> impl Iterator<Item = &Binding> + '_ {
        self.nodes.get(node).into_iter().flat_map(|data| {
            data.decoherent
                .iter()
                .filter_map(move |&index| data.bindings.get(index))
        })
    }

    /// Resolves the binding named `name` now if it is stale, and returns its value.
    ///
    /// Returns `Ok(None)` if there is no such binding or it resolves to nothing.
    pub fn resolve_binding(
        &mut self,
        node: NodeId,
        name: &str,
    ) -> Result<Option<BindingTarget>, ModelError> {
        let data = self.node_mut(node)?;
        let Some(index) = data.bindings.iter().position(|b| b.name == name) else {
            return Ok(None);
        };
        if data.bindings[index].decoherent {
            data.decoherent.retain(|&mut i| i != index);
            self.recohere_at(node, index);
        }
        Ok(self
            .nodes
            .get(node)
            .and_then(|data| data.bindings.get(index))
            .and_then(Binding::value))
    }

    /// Marks every binding named `key` on `node` as stale.
    pub(crate) fn decohere(&mut self, node: NodeId, key: &str) -> Result<(), ModelError> {
        let Some(data) = self.nodes.get(node) else {
            return Ok(());
        };
        let stale: smallvec::SmallVec<[usize; 2]> = data
            .bindings
            .iter()
            .enumerate()
            .filter(|(_, b)| b.name == key && !b.decoherent)
            .map(|(index, _)| index)
            .collect();
        for index in stale {
            self.decohere_at(node, index)?;
        }
        Ok(())
    }

    fn decohere_at(&mut self, node: NodeId, index: usize) -> Result<(), ModelError> {
        let data = self.node_mut(node)?;
        let Some(binding) = data.bindings.get_mut(index) else {
            return Ok(());
        };
        binding.decoherent = true;
        let required = binding.required_flags();
        data.decoherent.push(index);
        tracing::trace!(?node, name = %binding.name, "binding decoherent");
        self.require_update(node, required, false)
    }

    /// Recoheres every queued binding of `pass` on `node`.
    pub(crate) fn recohere(&mut self, node: NodeId, pass: Pass) {
        let Some(data) = self.nodes.get_mut(node) else {
            return;
        };
        let bindings = &data.bindings;
        let mut due = smallvec::SmallVec::<[usize; 2]>::new();
        data.decoherent.retain(|&mut index| {
            let matches = bindings.get(index).is_some_and(|b| b.affinity == pass);
            if matches {
                due.push(index);
            }
            !matches
        });
        for index in due {
            self.recohere_at(node, index);
        }
    }

    fn recohere_at(&mut self, node: NodeId, index: usize) {
        let Some(data) = self.nodes.get(node) else {
            return;
        };
        let Some(binding) = data.bindings.get(index) else {
            return;
        };
        let value = match binding.kind {
            BindingKind::Child => data
                .children_by_key
                .get(binding.name.as_str())
                .copied()
                .map(BindingTarget::Child),
            BindingKind::Aspect => data
                .aspects_by_key
                .get(binding.name.as_str())
                .copied()
                .map(BindingTarget::Aspect),
        };
        if let Some(binding) = self
            .nodes
            .get_mut(node)
            .and_then(|data| data.bindings.get_mut(index))
        {
            binding.value = value;
            binding.decoherent = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_bindings_resolve_lazily() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        let header = tree.create_node();
        tree.append_child(root, header, Some("header")).unwrap();
        tree.bind(root, Binding::child("header")).unwrap();

        let binding = tree.binding(root, "header").unwrap();
        assert!(binding.is_decoherent());
        assert_eq!(binding.value(), None);
        assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_MUTATE));

        let value = tree.resolve_binding(root, "header").unwrap();
        assert_eq!(value, Some(BindingTarget::Child(header)));
        assert_eq!(tree.decoherent_bindings(root).count(), 0);
    }

    #[test]
    fn keyed_insert_and_remove_decohere() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        tree.bind(root, Binding::child("body")).unwrap();
        tree.resolve_binding(root, "body").unwrap();

        let body = tree.create_node();
        tree.append_child(root, body, Some("body")).unwrap();
        assert!(tree.binding(root, "body").unwrap().is_decoherent());
        assert_eq!(
            tree.resolve_binding(root, "body").unwrap(),
            Some(BindingTarget::Child(body))
        );

        tree.remove_child(root, body).unwrap();
        assert!(tree.binding(root, "body").unwrap().is_decoherent());
        assert_eq!(tree.resolve_binding(root, "body").unwrap(), None);
    }

    #[test]
    fn unrelated_keys_leave_bindings_alone() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        tree.bind(root, Binding::child("a")).unwrap();
        tree.resolve_binding(root, "a").unwrap();

        let b = tree.create_node();
        tree.append_child(root, b, Some("b")).unwrap();
        assert!(!tree.binding(root, "a").unwrap().is_decoherent());
    }

    #[test]
    fn refresh_affinity_requires_reconcile() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        tree.bind(root, Binding::aspect("style").with_affinity(Pass::Refresh))
            .unwrap();
        let flags = tree.flags(root).unwrap();
        assert!(flags.contains(Flags::NEEDS_RECONCILE | Flags::NEEDS_REFRESH));
        assert!(!flags.intersects(Flags::ANALYZE_MASK));
    }

    #[test]
    fn recohere_only_touches_its_pass() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        tree.bind(root, Binding::child("a")).unwrap();
        tree.bind(root, Binding::child("b").with_affinity(Pass::Refresh))
            .unwrap();

        tree.recohere(root, Pass::Analyze);
        assert!(!tree.binding(root, "a").unwrap().is_decoherent());
        assert!(tree.binding(root, "b").unwrap().is_decoherent());
        let queued: alloc::vec::Vec<_> = tree
            .decoherent_bindings(root)
            .map(Binding::name)
            .collect();
        assert_eq!(queued, ["b"]);
    }
}
