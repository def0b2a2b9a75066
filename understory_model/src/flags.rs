// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Status and dirty-reason bitmasks, plus the pass and phase enums.

use core::fmt;

bitflags::bitflags! {
    /// Per-node status and dirty bits.
    ///
    /// The low byte holds status bits that describe where a node is in its
    /// lifecycle. The next byte holds the dirty reasons, split into two
    /// groups:
    ///
    /// - Analyze: [`NEEDS_ANALYZE`](Self::NEEDS_ANALYZE) is the coarse bit,
    ///   implied by any of [`NEEDS_MUTATE`](Self::NEEDS_MUTATE),
    ///   [`NEEDS_AGGREGATE`](Self::NEEDS_AGGREGATE), and
    ///   [`NEEDS_CORRELATE`](Self::NEEDS_CORRELATE).
    /// - Refresh: [`NEEDS_REFRESH`](Self::NEEDS_REFRESH) is the coarse bit,
    ///   implied by [`NEEDS_VALIDATE`](Self::NEEDS_VALIDATE) or
    ///   [`NEEDS_RECONCILE`](Self::NEEDS_RECONCILE).
    ///
    /// On an ancestor, a coarse bit without fine bits means "something below
    /// me is dirty".
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct Flags: u32 {
        /// The node belongs to a mounted tree.
        const MOUNTED = 1 << 0;
        /// A pass is currently visiting the node.
        const TRAVERSING = 1 << 1;
        /// The node is inside an analyze pass.
        const ANALYZING = 1 << 2;
        /// The node is inside a refresh pass.
        const REFRESHING = 1 << 3;
        /// At least one consumer is interested in the node.
        const CONSUMING = 1 << 4;
        /// The node asked to be removed once its parent's walk returns.
        const REMOVING = 1 << 5;
        /// A pass context is live for the node.
        const CONTEXTUAL = 1 << 6;

        /// Something in this subtree needs an analyze pass.
        const NEEDS_ANALYZE = 1 << 8;
        /// The node's own state must be updated.
        const NEEDS_MUTATE = 1 << 9;
        /// Values derived from children must be recomputed.
        const NEEDS_AGGREGATE = 1 << 10;
        /// Relationships with other nodes must be recomputed.
        const NEEDS_CORRELATE = 1 << 11;
        /// Something in this subtree needs a refresh pass.
        const NEEDS_REFRESH = 1 << 12;
        /// Results must be checked against their inputs.
        const NEEDS_VALIDATE = 1 << 13;
        /// Externally visible state must be brought in line.
        const NEEDS_RECONCILE = 1 << 14;
    }
}

impl Flags {
    /// All status bits.
    pub const STATUS_MASK: Self = Self::MOUNTED
        .union(Self::TRAVERSING)
        .union(Self::ANALYZING)
        .union(Self::REFRESHING)
        .union(Self::CONSUMING)
        .union(Self::REMOVING)
        .union(Self::CONTEXTUAL);

    /// Fine-grained analyze reasons.
    pub const ANALYZE_FINE: Self = Self::NEEDS_MUTATE
        .union(Self::NEEDS_AGGREGATE)
        .union(Self::NEEDS_CORRELATE);

    /// Every analyze-group bit.
    pub const ANALYZE_MASK: Self = Self::NEEDS_ANALYZE.union(Self::ANALYZE_FINE);

    /// Fine-grained refresh reasons.
    pub const REFRESH_FINE: Self = Self::NEEDS_VALIDATE.union(Self::NEEDS_RECONCILE);

    /// Every refresh-group bit.
    pub const REFRESH_MASK: Self = Self::NEEDS_REFRESH.union(Self::REFRESH_FINE);

    /// Every dirty bit.
    pub const UPDATE_MASK: Self = Self::ANALYZE_MASK.union(Self::REFRESH_MASK);

    /// Returns `self` with the coarse bit of every group that has a fine bit set.
    ///
    /// ```
    /// use understory_model::Flags;
    ///
    /// let flags = (Flags::NEEDS_MUTATE | Flags::NEEDS_VALIDATE).implied();
    /// assert!(flags.contains(Flags::NEEDS_ANALYZE | Flags::NEEDS_REFRESH));
    /// ```
    #[must_use]
    pub const fn implied(self) -> Self {
        self.union(self.coarse())
    }

    /// Returns only the coarse bits implied by `self`.
    ///
    /// A coarse bit that is already set counts as its own implication.
    #[must_use]
    pub const fn coarse(self) -> Self {
        let mut out = Self::empty();
        if self.intersects(Self::ANALYZE_MASK) {
            out = out.union(Self::NEEDS_ANALYZE);
        }
        if self.intersects(Self::REFRESH_MASK) {
            out = out.union(Self::NEEDS_REFRESH);
        }
        out
    }

    /// Returns only the dirty bits of `self`.
    #[must_use]
    pub const fn dirty(self) -> Self {
        self.intersection(Self::UPDATE_MASK)
    }

    /// Returns only the fine dirty bits of `self`, from both groups.
    #[must_use]
    pub const fn fine(self) -> Self {
        self.intersection(Self::ANALYZE_FINE.union(Self::REFRESH_FINE))
    }
}

bitflags::bitflags! {
    /// Status bits of an attached aspect, kept in step with its owner.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct AspectFlags: u8 {
        /// The aspect's owner is mounted.
        const MOUNTED = 1 << 0;
        /// The aspect's owner is being consumed.
        const CONSUMING = 1 << 1;
    }
}

/// One of the two update passes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Pass {
    /// Computes model state: mutate, aggregate, correlate.
    Analyze,
    /// Publishes model state: validate, reconcile.
    Refresh,
}

impl Pass {
    /// Returns the coarse dirty bit of this pass.
    #[must_use]
    pub const fn coarse(self) -> Flags {
        match self {
            Self::Analyze => Flags::NEEDS_ANALYZE,
            Self::Refresh => Flags::NEEDS_REFRESH,
        }
    }

    /// Returns the fine dirty bits of this pass.
    #[must_use]
    pub const fn fine(self) -> Flags {
        match self {
            Self::Analyze => Flags::ANALYZE_FINE,
            Self::Refresh => Flags::REFRESH_FINE,
        }
    }

    /// Returns every dirty bit belonging to this pass.
    #[must_use]
    pub const fn mask(self) -> Flags {
        match self {
            Self::Analyze => Flags::ANALYZE_MASK,
            Self::Refresh => Flags::REFRESH_MASK,
        }
    }

    /// Returns the status bit set on nodes while this pass visits them.
    #[must_use]
    pub const fn status(self) -> Flags {
        match self {
            Self::Analyze => Flags::ANALYZING,
            Self::Refresh => Flags::REFRESHING,
        }
    }

    /// Returns the envelope phase of this pass.
    #[must_use]
    pub const fn phase(self) -> Phase {
        match self {
            Self::Analyze => Phase::Analyze,
            Self::Refresh => Phase::Refresh,
        }
    }

    /// Returns the sub-phases of this pass in execution order.
    #[must_use]
    pub const fn sub_phases(self) -> &'static [Phase] {
        match self {
            Self::Analyze => &[Phase::Mutate, Phase::Aggregate, Phase::Correlate],
            Self::Refresh => &[Phase::Validate, Phase::Reconcile],
        }
    }
}

impl fmt::Display for Pass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Analyze => "analyze",
            Self::Refresh => "refresh",
        })
    }
}

/// A step of a pass at which `will`/`on`/`did` callbacks fire.
///
/// [`Phase::Analyze`] and [`Phase::Refresh`] are the envelopes of their
/// passes; the others are sub-phases.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Envelope of the analyze pass.
    Analyze,
    /// Analyze sub-phase for [`Flags::NEEDS_MUTATE`].
    Mutate,
    /// Analyze sub-phase for [`Flags::NEEDS_AGGREGATE`].
    Aggregate,
    /// Analyze sub-phase for [`Flags::NEEDS_CORRELATE`].
    Correlate,
    /// Envelope of the refresh pass.
    Refresh,
    /// Refresh sub-phase for [`Flags::NEEDS_VALIDATE`].
    Validate,
    /// Refresh sub-phase for [`Flags::NEEDS_RECONCILE`].
    Reconcile,
}

impl Phase {
    /// Returns the pass this phase belongs to.
    #[must_use]
    pub const fn pass(self) -> Pass {
        match self {
            Self::Analyze | Self::Mutate | Self::Aggregate | Self::Correlate => Pass::Analyze,
            Self::Refresh | Self::Validate | Self::Reconcile => Pass::Refresh,
        }
    }

    /// Returns the dirty bit that selects this phase.
    #[must_use]
    pub const fn flag(self) -> Flags {
        match self {
            Self::Analyze => Flags::NEEDS_ANALYZE,
            Self::Mutate => Flags::NEEDS_MUTATE,
            Self::Aggregate => Flags::NEEDS_AGGREGATE,
            Self::Correlate => Flags::NEEDS_CORRELATE,
            Self::Refresh => Flags::NEEDS_REFRESH,
            Self::Validate => Flags::NEEDS_VALIDATE,
            Self::Reconcile => Flags::NEEDS_RECONCILE,
        }
    }

    /// Returns `true` for the envelope phases.
    #[must_use]
    pub const fn is_envelope(self) -> bool {
        matches!(self, Self::Analyze | Self::Refresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regions_are_disjoint() {
        assert!(!Flags::STATUS_MASK.intersects(Flags::UPDATE_MASK));
        assert!(!Flags::ANALYZE_MASK.intersects(Flags::REFRESH_MASK));
        assert_eq!(Flags::STATUS_MASK | Flags::UPDATE_MASK, Flags::all());
    }

    #[test]
    fn fine_bits_imply_their_coarse_bit() {
        for phase in Pass::Analyze.sub_phases() {
            assert_eq!(phase.flag().implied(), phase.flag() | Flags::NEEDS_ANALYZE);
        }
        for phase in Pass::Refresh.sub_phases() {
            assert_eq!(phase.flag().implied(), phase.flag() | Flags::NEEDS_REFRESH);
        }
        assert_eq!(Flags::MOUNTED.implied(), Flags::MOUNTED);
    }

    #[test]
    fn phases_round_trip_through_their_pass() {
        for pass in [Pass::Analyze, Pass::Refresh] {
            assert_eq!(pass.phase().pass(), pass);
            assert!(pass.phase().is_envelope());
            for phase in pass.sub_phases() {
                assert_eq!(phase.pass(), pass);
                assert!(pass.fine().contains(phase.flag()));
                assert!(!phase.is_envelope());
            }
        }
    }

    #[test]
    fn dirty_strips_status() {
        let flags = Flags::MOUNTED | Flags::TRAVERSING | Flags::NEEDS_RECONCILE;
        assert_eq!(flags.dirty(), Flags::NEEDS_RECONCILE);
    }
}
