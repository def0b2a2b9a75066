// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Model: a hierarchical incremental update engine.
//!
//! Applications build a [`Tree`] of stateful nodes, attach [`Aspect`]s to
//! them, and mark nodes dirty with fine-grained reasons. The engine turns
//! those marks into passes that do exactly the work required, in a fixed
//! order:
//!
//! - **Analyze** computes model state in three sub-phases:
//!   [`Mutate`](Phase::Mutate), [`Aggregate`](Phase::Aggregate), and
//!   [`Correlate`](Phase::Correlate).
//! - **Refresh** publishes it in two: [`Validate`](Phase::Validate) and
//!   [`Reconcile`](Phase::Reconcile).
//!
//! Within a sub-phase a parent always runs before its children, and a whole
//! subtree finishes one sub-phase before any node in it starts the next.
//!
//! The pieces:
//!
//! - [`Flags`]: status and dirty bits. Each pass has a coarse bit
//!   ([`NEEDS_ANALYZE`](Flags::NEEDS_ANALYZE),
//!   [`NEEDS_REFRESH`](Flags::NEEDS_REFRESH)) implied by its fine bits.
//! - [`Tree`]: node and aspect arenas addressed by [`NodeId`] and
//!   [`AspectId`], with child and aspect mutation, mount and consume
//!   lifecycles, and the two traversals.
//! - [`Aspect`]: attachable behavior. Aspects receive every lifecycle hook of
//!   their node, filter dirty requests, and can wrap the children walk
//!   through [`ChildWalk`].
//! - [`Observer`]: notification-only listeners.
//! - [`Binding`]: named, lazily resolved links to a keyed child or aspect.
//! - [`UpdateScheduler`]: aggregates dirty roots and runs passes off a
//!   [`Clock`], adapting its delay to how long analyze passes take.
//!
//! ## Example
//!
//! ```rust
//! use understory_model::{Flags, ManualClock, SchedulerConfig, Tree};
//!
//! let clock = ManualClock::new();
//! let mut tree = Tree::with_config(SchedulerConfig::default(), clock.clone());
//!
//! let root = tree.create_node();
//! let a = tree.create_node();
//! let b = tree.create_node();
//! tree.append_child(root, a, Some("a"))?;
//! tree.append_child(a, b, None)?;
//! tree.mount(root)?;
//!
//! // Dirty a leaf; the request bubbles to the scheduler, which sets a timer.
//! tree.require_update(b, Flags::NEEDS_MUTATE, false)?;
//! assert!(tree.flags(root).unwrap().contains(Flags::NEEDS_ANALYZE));
//! let deadline = tree.next_deadline().unwrap();
//!
//! // The host sleeps until the deadline, then services the timers.
//! clock.set(deadline);
//! assert_eq!(tree.run_due()?, 1);
//! assert!(!tree.flags(b).unwrap().intersects(Flags::UPDATE_MASK));
//! # Ok::<(), understory_model::ModelError>(())
//! ```
//!
//! ## Re-entrancy
//!
//! Hooks receive `&mut Tree` and may mutate it freely. An aspect is checked
//! out of the tree while its own hook runs, so hooks that would land on it
//! in the meantime are skipped. Children removed during a walk are handled
//! by an index-stable iteration, and a node can remove itself mid-visit with
//! [`Tree::remove`]. Starting a pass on a node that is already being visited
//! fails with [`ModelError::AlreadyTraversing`].
//!
//! ## Logging
//!
//! The crate emits [`tracing`] events: `debug` for passes and root
//! lifecycle, `trace` for timers and node visits, `warn` when a hook aborts
//! a pass. It never installs a subscriber.
//!
//! ## Features
//!
//! - `std` (disabled by default): enables `SystemClock` and the `std`
//!   integrations of `tracing` and `thiserror`.
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod aspect;
mod binding;
mod context;
mod error;
mod flags;
mod id;
mod mount;
mod node;
mod observer;
mod scheduler;
mod structure;
mod traverse;
mod tree;
mod update;

pub use aspect::Aspect;
pub use binding::{Binding, BindingKind, BindingTarget};
pub use context::{ModelContext, UpdateContext};
pub use error::ModelError;
pub use flags::{AspectFlags, Flags, Pass, Phase};
pub use id::{AspectId, NodeId, ObserverId};
pub use observer::Observer;
pub use scheduler::{SchedulerConfig, UpdateScheduler};
pub use traverse::ChildWalk;
pub use tree::Tree;

#[cfg(feature = "std")]
pub use understory_timing::SystemClock;
pub use understory_timing::{Clock, ManualClock};
