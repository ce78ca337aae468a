//! Serializes machine rebuilds against live event dispatch.
//!
//! One mutex owns the live engine; `trigger`/`tick` dispatch under it and
//! rebuilds swap the engine under it, so a table can never be replaced
//! beneath an in-flight transition. Rebuilds are requested with a flag from
//! any context and performed only from the cooperative loop, between
//! dispatches. Emitted actions are returned to the caller and interpreted
//! after the lock is released, which keeps the blocking sleep call outside
//! every critical section.

use crate::fsm::ActionVec;
use crate::orchestrator::{build_power_fsm, PowerAction, PowerFsm};
use crate::profile::ProfileResolver;
use crate::types::{HardwareCaps, PowerEvent, PowerState};
use embassy_time::Instant;
use log::{debug, info};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub struct ReconfigurationCoordinator {
    engine: Mutex<Option<PowerFsm>>,
    pending: AtomicBool,
    built: AtomicBool,
}

impl ReconfigurationCoordinator {
    pub fn new() -> Self {
        Self {
            engine: Mutex::new(None),
            pending: AtomicBool::new(false),
            built: AtomicBool::new(false),
        }
    }

    /// First build, starting from BOOT. Returns the entry actions of the
    /// initial state for interpretation.
    pub fn install_initial(&self, resolver: &ProfileResolver, caps: HardwareCaps) -> ActionVec<PowerAction> {
        let mut slot = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        let mut fsm = build_power_fsm(resolver, caps, None);
        let actions = fsm.start();
        info!("power machine built, starting from {}", fsm.state_name());
        *slot = Some(fsm);
        self.built.store(true, Ordering::Release);
        actions
    }

    /// Request a rebuild. Safe from any context; never rebuilds
    /// synchronously. Requests before the first build are dropped.
    pub fn schedule_rebuild(&self) {
        if self.built.load(Ordering::Acquire) {
            self.pending.store(true, Ordering::Release);
            debug!("power machine rebuild scheduled");
        } else {
            debug!("rebuild request dropped, machine not built yet");
        }
    }

    /// Perform a pending rebuild, if any. Must be called from the
    /// cooperative loop only, never from inside dispatch.
    pub fn process_pending(&self, resolver: &ProfileResolver, caps: HardwareCaps) -> ActionVec<PowerAction> {
        if !self.pending.swap(false, Ordering::AcqRel) {
            return ActionVec::new();
        }
        let mut slot = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        let Some(old) = slot.as_ref() else {
            return ActionVec::new();
        };
        let preserved = old.current_state();
        let mut fsm = build_power_fsm(resolver, caps, Some(preserved));
        let actions = fsm.start();
        info!("power machine rebuilt, preserving state {}", fsm.state_name());
        *slot = Some(fsm);
        actions
    }

    /// Dispatch one event through the live engine.
    pub fn trigger(&self, event: PowerEvent) -> ActionVec<PowerAction> {
        let mut slot = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(fsm) => fsm.trigger(event),
            None => ActionVec::new(),
        }
    }

    /// One cooperative tick of the live engine.
    pub fn tick(&self) -> ActionVec<PowerAction> {
        self.tick_at(Instant::now())
    }

    /// Tick against an explicit clock; timed-rule deadlines are evaluated
    /// relative to `now`.
    pub fn tick_at(&self, now: Instant) -> ActionVec<PowerAction> {
        let mut slot = self.engine.lock().unwrap_or_else(|e| e.into_inner());
        match slot.as_mut() {
            Some(fsm) => fsm.tick(now),
            None => ActionVec::new(),
        }
    }

    pub fn current_state(&self) -> Option<PowerState> {
        self.engine
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|fsm| fsm.current_state())
    }
}

impl Default for ReconfigurationCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
