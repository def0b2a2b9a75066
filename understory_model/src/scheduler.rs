// Copyright 2025 the Understory Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The update scheduler: when passes run, and how often.

use alloc::vec::Vec;
use core::fmt;

use smallvec::SmallVec;
use understory_timing::{TimerId, TimerQueue};

use crate::context::ModelContext;
use crate::error::ModelError;
use crate::flags::{Flags, Pass};
use crate::id::NodeId;
use crate::tree::Tree;

/// Pacing parameters of an [`UpdateScheduler`], in milliseconds.
///
/// ```
/// use understory_model::SchedulerConfig;
///
/// let config = SchedulerConfig::default()
///     .with_max_update_delay(2)
///     .with_min_update_delay(4);
/// // The bounds never cross.
/// assert_eq!(config.max_update_delay, 4);
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SchedulerConfig {
    /// Lower bound of the adaptive delay.
    pub min_update_delay: u64,
    /// Upper bound of the adaptive delay.
    pub max_update_delay: u64,
    /// Immediate requests run synchronously only while the adaptive delay
    /// is at or below this.
    pub max_analyze_interval: u64,
    /// Delay between an analyze pass and the refresh pass it leaves behind.
    pub refresh_interval: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_update_delay: 0,
            max_update_delay: 167,
            max_analyze_interval: 33,
            refresh_interval: 4,
        }
    }
}

impl SchedulerConfig {
    /// Sets the lower bound of the adaptive delay, raising the upper bound
    /// to match if needed.
    #[must_use]
    pub const fn with_min_update_delay(mut self, ms: u64) -> Self {
        self.min_update_delay = ms;
        self.normalized()
    }

    /// Sets the upper bound of the adaptive delay, lowering the lower bound
    /// to match if needed.
    #[must_use]
    pub const fn with_max_update_delay(mut self, ms: u64) -> Self {
        self.max_update_delay = ms;
        if self.min_update_delay > ms {
            self.min_update_delay = ms;
        }
        self
    }

    /// Sets the threshold for synchronous immediate passes.
    #[must_use]
    pub const fn with_max_analyze_interval(mut self, ms: u64) -> Self {
        self.max_analyze_interval = ms;
        self
    }

    /// Sets the delay used to chain a refresh pass after an analyze pass.
    #[must_use]
    pub const fn with_refresh_interval(mut self, ms: u64) -> Self {
        self.refresh_interval = ms;
        self
    }

    /// Returns the configuration with `max_update_delay >= min_update_delay`.
    #[must_use]
    pub const fn normalized(mut self) -> Self {
        if self.max_update_delay < self.min_update_delay {
            self.max_update_delay = self.min_update_delay;
        }
        self
    }

    const fn clamp(&self, delay: u64) -> u64 {
        if delay < self.min_update_delay {
            self.min_update_delay
        } else if delay > self.max_update_delay {
            self.max_update_delay
        } else {
            delay
        }
    }
}

/// Aggregated dirty state of every mounted root, and the timers that turn
/// it into passes.
///
/// The scheduler keeps at most one pending timer per [`Pass`]; further
/// requests fold into the pass already scheduled. Analyze passes adapt the
/// delay: a pass that took longer than the current delay doubles it, a pass
/// that fit halves it, always within the configured bounds. Refresh passes
/// leave the delay alone.
///
/// The scheduler is owned by its [`Tree`]; the tree exposes it read-only
/// through [`Tree::scheduler`] and drives it with
/// [`Tree::run_due`], [`Tree::run_analyze_pass`], and friends.
pub struct UpdateScheduler {
    config: SchedulerConfig,
    flags: Flags,
    update_delay: u64,
    timers: TimerQueue<Pass>,
    analyze_timer: Option<TimerId>,
    refresh_timer: Option<TimerId>,
    roots: Vec<NodeId>,
    powered: bool,
    running: Option<Pass>,
    last_update_time: u64,
    analyze_passes: u64,
    refresh_passes: u64,
}

impl UpdateScheduler {
    pub(crate) fn new(config: SchedulerConfig) -> Self {
        let config = config.normalized();
        Self {
            config,
            flags: Flags::empty(),
            update_delay: config.min_update_delay,
            timers: TimerQueue::new(),
            analyze_timer: None,
            refresh_timer: None,
            roots: Vec::new(),
            powered: true,
            running: None,
            last_update_time: 0,
            analyze_passes: 0,
            refresh_passes: 0,
        }
    }

    /// The pacing configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Dirty bits requested by the roots and not yet handled by a pass.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// The current adaptive delay.
    #[must_use]
    pub fn update_delay(&self) -> u64 {
        self.update_delay
    }

    /// The registered (mounted) roots, in mount order.
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Returns `true` unless the scheduler has been [unpowered](Tree::unpower).
    #[must_use]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// The pass currently running, if any.
    #[must_use]
    pub fn running(&self) -> Option<Pass> {
        self.running
    }

    /// Deadline of the pending timer for `pass`.
    #[must_use]
    pub fn pending(&self, pass: Pass) -> Option<u64> {
        self.timer(pass).and_then(|id| self.timers.deadline(id))
    }

    /// Number of pending timers, at most one per pass.
    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.timers.len()
    }

    /// Number of analyze passes run so far.
    #[must_use]
    pub fn analyze_pass_count(&self) -> u64 {
        self.analyze_passes
    }

    /// Number of refresh passes run so far.
    #[must_use]
    pub fn refresh_pass_count(&self) -> u64 {
        self.refresh_passes
    }

    fn timer(&self, pass: Pass) -> Option<TimerId> {
        match pass {
            Pass::Analyze => self.analyze_timer,
            Pass::Refresh => self.refresh_timer,
        }
    }

    fn timer_mut(&mut self, pass: Pass) -> &mut Option<TimerId> {
        match pass {
            Pass::Analyze => &mut self.analyze_timer,
            Pass::Refresh => &mut self.refresh_timer,
        }
    }

    pub(crate) fn register_root(&mut self, root: NodeId) {
        if !self.roots.contains(&root) {
            self.roots.push(root);
        }
    }

    pub(crate) fn unregister_root(&mut self, root: NodeId) {
        self.roots.retain(|&r| r != root);
        if self.roots.is_empty() {
            self.cancel(Pass::Analyze);
            self.cancel(Pass::Refresh);
            self.flags = Flags::empty();
            self.update_delay = self.config.min_update_delay;
            tracing::debug!("last root unregistered; scheduler reset");
        }
    }

    fn cancel(&mut self, pass: Pass) {
        if let Some(id) = self.timer_mut(pass).take() {
            self.timers.cancel(id);
        }
    }

    /// Schedules a timer for `pass`, unless one is already pending.
    fn schedule(&mut self, pass: Pass, now: u64, delay: u64) {
        if let Some(id) = self.timer(pass) {
            if self.timers.is_pending(id) {
                tracing::trace!(%pass, "pass already scheduled");
                return;
            }
        }
        let deadline = now.saturating_add(delay);
        let id = self.timers.schedule(deadline, pass);
        *self.timer_mut(pass) = Some(id);
        tracing::trace!(%pass, deadline, "pass scheduled");
    }

    /// Schedules whatever the aggregated flags call for, at the current delay.
    fn schedule_update(&mut self, now: u64) {
        if self.flags.intersects(Flags::ANALYZE_MASK) {
            self.schedule(Pass::Analyze, now, self.update_delay);
        } else if self.flags.intersects(Flags::REFRESH_MASK) {
            self.schedule(Pass::Refresh, now, self.update_delay);
        }
    }

    /// Feeds the duration of a timer-driven analyze pass back into the delay.
    fn adapt(&mut self, elapsed: u64) {
        let delay = self.update_delay;
        self.update_delay = if elapsed > delay {
            self.config.clamp(delay.saturating_mul(2).max(1))
        } else {
            self.config.clamp(delay / 2)
        };
    }
}

impl fmt::Debug for UpdateScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateScheduler")
            .field("config", &self.config)
            .field("flags", &self.flags)
            .field("update_delay", &self.update_delay)
            .field("analyze_timer", &self.analyze_timer)
            .field("refresh_timer", &self.refresh_timer)
            .field("roots", &self.roots)
            .field("powered", &self.powered)
            .field("running", &self.running)
            .field("last_update_time", &self.last_update_time)
            .field("analyze_passes", &self.analyze_passes)
            .field("refresh_passes", &self.refresh_passes)
            .finish_non_exhaustive()
    }
}

impl<X: ModelContext> Tree<X> {
    /// Accepts a request that bubbled out of a mounted root.
    ///
    /// Requests made while a pass runs only fold in their flags; the pass
    /// schedules its follow-up when it finishes.
    pub(crate) fn schedule_request(&mut self, flags: Flags, immediate: bool) -> Result<(), ModelError> {
        self.scheduler.flags.insert(flags.implied().dirty());
        if !self.scheduler.powered || self.scheduler.running.is_some() {
            return Ok(());
        }
        let can_run_now = immediate
            && self.scheduler.update_delay <= self.scheduler.config.max_analyze_interval
            && !self.scheduler.roots.iter().any(|&root| {
                self.nodes
                    .get(root)
                    .is_some_and(|data| data.flags.contains(Flags::TRAVERSING))
            });
        if can_run_now {
            return self.run_immediate();
        }
        let now = self.clock.now();
        self.scheduler.schedule_update(now);
        Ok(())
    }

    fn run_immediate(&mut self) -> Result<(), ModelError> {
        tracing::trace!("running immediate update");
        if self.scheduler.flags.intersects(Flags::ANALYZE_MASK) {
            self.run_pass(Pass::Analyze, true)?;
        }
        if self.scheduler.flags.intersects(Flags::REFRESH_MASK) {
            self.run_pass(Pass::Refresh, true)?;
        }
        Ok(())
    }

    /// Runs an analyze pass over every root with pending analyze bits.
    ///
    /// This is what an expired analyze timer does; it is public for hosts
    /// that drive passes themselves. Fails with
    /// [`ModelError::PassInProgress`] if called from inside a pass.
    pub fn run_analyze_pass(&mut self) -> Result<(), ModelError> {
        self.run_pass(Pass::Analyze, false)
    }

    /// Runs a refresh pass over every root with pending refresh bits.
    ///
    /// See [`run_analyze_pass`](Self::run_analyze_pass).
    pub fn run_refresh_pass(&mut self) -> Result<(), ModelError> {
        self.run_pass(Pass::Refresh, false)
    }

    fn run_pass(&mut self, pass: Pass, immediate: bool) -> Result<(), ModelError> {
        if self.scheduler.running.is_some() {
            return Err(ModelError::PassInProgress);
        }
        self.scheduler.cancel(pass);

        let start = self.clock.now();
        self.scheduler.flags.remove(pass.mask());
        let update_time = start.max(self.scheduler.last_update_time);
        self.scheduler.last_update_time = update_time;
        let cx = (self.context_factory)(update_time);

        self.scheduler.running = Some(pass);
        let roots: SmallVec<[NodeId; 4]> = self.scheduler.roots.iter().copied().collect();
        let mut visited = 0_usize;
        let mut result = Ok(());
        for root in roots {
            let dirty = self
                .nodes
                .get(root)
                .is_some_and(|data| data.pending(pass).intersects(pass.mask()));
            if !dirty {
                continue;
            }
            visited += 1;
            // Each root runs its own work only.
            result = match pass {
                Pass::Analyze => self.cascade_analyze(root, Flags::empty(), &cx),
                Pass::Refresh => self.cascade_refresh(root, Flags::empty(), &cx),
            };
            if result.is_err() {
                break;
            }
        }
        self.scheduler.running = None;

        let elapsed = self.clock.now().saturating_sub(start);
        match pass {
            Pass::Analyze => {
                self.scheduler.analyze_passes += 1;
                if !immediate {
                    self.scheduler.adapt(elapsed);
                }
            }
            Pass::Refresh => self.scheduler.refresh_passes += 1,
        }
        // The roots know what the pass left behind or newly required.
        // Requests it served along the way are not pending any more.
        self.scheduler.flags.remove(pass.mask());
        for &root in &self.scheduler.roots {
            if let Some(data) = self.nodes.get(root) {
                self.scheduler.flags.insert(data.subtree_dirty());
            }
        }
        if let Err(err) = &result {
            tracing::warn!(%pass, %err, "update pass aborted");
        }
        tracing::debug!(
            %pass,
            immediate,
            roots = visited,
            elapsed,
            delay = self.scheduler.update_delay,
            "update pass finished"
        );

        if self.scheduler.powered {
            let now = self.clock.now();
            let scheduler = &mut self.scheduler;
            if scheduler.flags.intersects(Flags::REFRESH_MASK) {
                let interval = scheduler.config.refresh_interval;
                scheduler.schedule(Pass::Refresh, now, interval);
            } else if scheduler.flags.intersects(Flags::ANALYZE_MASK) {
                let delay = scheduler.update_delay;
                scheduler.schedule(Pass::Analyze, now, delay);
            }
        }
        result
    }

    /// Runs every pass whose timer has expired, returning how many ran.
    pub fn run_due(&mut self) -> Result<usize, ModelError> {
        let now = self.clock.now();
        let mut due: SmallVec<[(TimerId, Pass); 2]> = SmallVec::new();
        while let Some(fired) = self.scheduler.timers.pop_due(now) {
            due.push(fired);
        }
        let mut ran = 0;
        for (id, pass) in due {
            // A pass that ran earlier in this batch may have replaced the timer.
            if self.scheduler.timer(pass) != Some(id) {
                continue;
            }
            *self.scheduler.timer_mut(pass) = None;
            self.run_pass(pass, false)?;
            ran += 1;
        }
        Ok(ran)
    }

    /// Returns the earliest pending timer deadline, for hosts to sleep until.
    #[must_use]
    pub fn next_deadline(&self) -> Option<u64> {
        self.scheduler.timers.next_deadline()
    }

    /// Resumes scheduling and requests every root's pending work again.
    pub fn power(&mut self) {
        if self.scheduler.powered {
            return;
        }
        self.scheduler.powered = true;
        tracing::debug!("scheduler powered");
        for &root in &self.scheduler.roots {
            if let Some(data) = self.nodes.get(root) {
                self.scheduler.flags.insert(data.subtree_dirty());
            }
        }
        let now = self.clock.now();
        self.scheduler.schedule_update(now);
    }

    /// Pauses scheduling: cancels pending timers and resets the delay.
    ///
    /// Requests keep accumulating and are picked up by [`power`](Self::power).
    /// A pass already running is not interrupted.
    pub fn unpower(&mut self) {
        if !self.scheduler.powered {
            return;
        }
        self.scheduler.powered = false;
        self.scheduler.cancel(Pass::Analyze);
        self.scheduler.cancel(Pass::Refresh);
        self.scheduler.update_delay = self.scheduler.config.min_update_delay;
        tracing::debug!("scheduler unpowered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.min_update_delay, 0);
        assert_eq!(config.max_update_delay, 167);
        assert_eq!(config.max_analyze_interval, 33);
        assert_eq!(config.refresh_interval, 4);
    }

    #[test]
    fn adapt_doubles_and_halves_within_bounds() {
        let config = SchedulerConfig::default()
            .with_min_update_delay(2)
            .with_max_update_delay(20);
        let mut scheduler = UpdateScheduler::new(config);
        assert_eq!(scheduler.update_delay(), 2);

        scheduler.adapt(100);
        assert_eq!(scheduler.update_delay(), 4);
        scheduler.adapt(100);
        scheduler.adapt(100);
        scheduler.adapt(100);
        assert_eq!(scheduler.update_delay(), 20);

        scheduler.adapt(0);
        assert_eq!(scheduler.update_delay(), 10);
        for _ in 0..10 {
            scheduler.adapt(0);
        }
        assert_eq!(scheduler.update_delay(), 2);
    }

    #[test]
    fn adapt_leaves_zero_when_fast() {
        let mut scheduler = UpdateScheduler::new(SchedulerConfig::default());
        scheduler.adapt(0);
        assert_eq!(scheduler.update_delay(), 0);
        scheduler.adapt(1);
        assert_eq!(scheduler.update_delay(), 1);
    }

    #[test]
    fn one_timer_per_pass() {
        let mut scheduler = UpdateScheduler::new(SchedulerConfig::default());
        scheduler.schedule(Pass::Analyze, 0, 10);
        scheduler.schedule(Pass::Analyze, 0, 5);
        scheduler.schedule(Pass::Refresh, 0, 4);
        assert_eq!(scheduler.pending_timers(), 2);
        assert_eq!(scheduler.pending(Pass::Analyze), Some(10));
        assert_eq!(scheduler.pending(Pass::Refresh), Some(4));
    }

    #[test]
    fn last_root_resets_the_scheduler() {
        let mut tree = Tree::new();
        let root = tree.create_node();
        tree.mount(root).unwrap();
        tree.require_update(root, Flags::NEEDS_MUTATE, false).unwrap();
        assert_eq!(tree.scheduler().pending_timers(), 1);

        tree.unmount(root).unwrap();
        assert_eq!(tree.scheduler().pending_timers(), 0);
        assert!(tree.scheduler().flags().is_empty());
        assert_eq!(tree.next_deadline(), None);
    }
}
