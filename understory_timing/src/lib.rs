// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Understory Timing: host-agnostic timer queue primitives for UI runtimes.
//!
//! UI runtimes need deferred work ("run an update pass in 16ms") without
//! committing to a particular event loop. This crate splits that into two
//! small pieces:
//!
//! - [`Clock`]: a millisecond time source. Use [`ManualClock`] for
//!   deterministic tests and simulations, or `SystemClock` (feature `std`)
//!   for real hosts.
//! - [`TimerQueue`]: deadline-ordered payloads keyed by stable [`TimerId`]
//!   handles. The queue never sleeps; hosts poll [`TimerQueue::next_deadline`]
//!   and drain with [`TimerQueue::pop_due`].
//!
//! ## Example
//!
//! ```rust
//! use understory_timing::{Clock, ManualClock, TimerQueue};
//!
//! let clock = ManualClock::new();
//! let mut timers = TimerQueue::new();
//!
//! let paint = timers.schedule(clock.now() + 16, "paint");
//! let _layout = timers.schedule(clock.now() + 4, "layout");
//! assert_eq!(timers.next_deadline(), Some(4));
//!
//! // Cancelled timers never fire.
//! assert_eq!(timers.cancel(paint), Some("paint"));
//!
//! clock.advance(20);
//! let fired: Vec<_> = core::iter::from_fn(|| timers.pop_due(clock.now()))
//!     .map(|(_, what)| what)
//!     .collect();
//! assert_eq!(fired, vec!["layout"]);
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

mod clock;
mod queue;

#[cfg(feature = "std")]
pub use clock::SystemClock;
pub use clock::{Clock, ManualClock};
pub use queue::{TimerId, TimerQueue};
