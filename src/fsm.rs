//! Table-driven finite state machine with plain and timed transition rules.
//!
//! The engine is generic over state, event and action types. It never
//! performs side effects itself: every dispatch returns the tagged actions
//! collected from exit/enter hooks and the fired rule, in order, for a
//! single interpreter to execute. Tables are built once and never mutated
//! while live; reconfiguration swaps in a freshly built machine.

use embassy_time::{Duration, Instant};
use log::{debug, warn};

/// Actions collected during one dispatch.
pub type ActionVec<A> = heapless::Vec<A, 10>;

/// One state of the machine: identity, diagnostic name and the action
/// lists emitted on entry, per idle tick and on exit.
#[derive(Debug, Clone)]
pub struct StateDef<S, A> {
    pub id: S,
    pub name: &'static str,
    enter: ActionVec<A>,
    idle: ActionVec<A>,
    exit: ActionVec<A>,
}

impl<S, A: Clone> StateDef<S, A> {
    pub fn new(id: S, name: &'static str) -> Self {
        Self {
            id,
            name,
            enter: ActionVec::new(),
            idle: ActionVec::new(),
            exit: ActionVec::new(),
        }
    }

    pub fn on_enter(mut self, actions: &[A]) -> Self {
        let _ = self.enter.extend_from_slice(actions);
        self
    }

    pub fn on_idle(mut self, actions: &[A]) -> Self {
        let _ = self.idle.extend_from_slice(actions);
        self
    }

    pub fn on_exit(mut self, actions: &[A]) -> Self {
        let _ = self.exit.extend_from_slice(actions);
        self
    }
}

#[derive(Debug, Clone)]
struct Rule<S, E, A> {
    from: S,
    event: E,
    to: S,
    action: Option<A>,
    name: &'static str,
}

#[derive(Debug, Clone)]
struct TimedRule<S, A> {
    from: S,
    to: S,
    after: Duration,
    action: Option<A>,
    name: &'static str,
}

/// Generic dispatcher. Exactly one state is current at any instant; all
/// mutation happens through `trigger`/`poll_timed`, which the caller is
/// expected to serialize (see `ReconfigurationCoordinator`).
pub struct Fsm<S, E, A> {
    states: Vec<StateDef<S, A>>,
    rules: Vec<Rule<S, E, A>>,
    timed: Vec<TimedRule<S, A>>,
    current: S,
    entered_at: Instant,
    started: bool,
}

impl<S, E, A> Fsm<S, E, A>
where
    S: Copy + PartialEq + core::fmt::Debug,
    E: Copy + PartialEq + core::fmt::Debug,
    A: Clone,
{
    pub fn new(initial: S) -> Self {
        Self {
            states: Vec::new(),
            rules: Vec::new(),
            timed: Vec::new(),
            current: initial,
            entered_at: Instant::now(),
            started: false,
        }
    }

    pub fn add_state(&mut self, def: StateDef<S, A>) {
        self.states.push(def);
    }

    /// Register a plain rule. At most one rule may exist per (state, event):
    /// a duplicate replaces the earlier rule and is flagged at build time so
    /// shadowing never happens silently.
    pub fn add_transition(&mut self, from: S, event: E, to: S, action: Option<A>, name: &'static str) {
        if let Some(existing) = self
            .rules
            .iter_mut()
            .find(|r| r.from == from && r.event == event)
        {
            warn!(
                "duplicate rule for ({:?}, {:?}): '{}' shadows '{}'",
                from, event, name, existing.name
            );
            existing.to = to;
            existing.action = action;
            existing.name = name;
            return;
        }
        self.rules.push(Rule {
            from,
            event,
            to,
            action,
            name,
        });
    }

    /// Register a timed rule. The deadline is armed at every entry of
    /// `from`; firing re-enters the target, which re-arms it.
    pub fn add_timed_transition(&mut self, from: S, to: S, after: Duration, action: Option<A>, name: &'static str) {
        self.timed.push(TimedRule {
            from,
            to,
            after,
            action,
            name,
        });
    }

    pub fn current_state(&self) -> S {
        self.current
    }

    pub fn entered_at(&self) -> Instant {
        self.entered_at
    }

    pub fn state_name(&self) -> &'static str {
        self.state_def(self.current).map(|d| d.name).unwrap_or("?")
    }

    fn state_def(&self, id: S) -> Option<&StateDef<S, A>> {
        self.states.iter().find(|d| d.id == id)
    }

    /// Emit the current state's enter actions once, so a freshly built (or
    /// rebuilt) machine starts from a consistent hardware posture.
    pub fn start(&mut self) -> ActionVec<A> {
        if self.started {
            return ActionVec::new();
        }
        self.started = true;
        self.entered_at = Instant::now();
        debug!("fsm start in {}", self.state_name());
        self.state_def(self.current)
            .map(|d| d.enter.clone())
            .unwrap_or_default()
    }

    /// Dispatch one event. Unregistered (state, event) pairs are silently
    /// ignored: most events are irrelevant in most states.
    pub fn trigger(&mut self, event: E) -> ActionVec<A> {
        let rule = self
            .rules
            .iter()
            .find(|r| r.from == self.current && r.event == event)
            .cloned();
        match rule {
            Some(rule) => {
                debug!("{} -> {:?} on {:?} ({})", self.state_name(), rule.to, event, rule.name);
                self.apply(rule.to, rule.action, Instant::now())
            }
            None => ActionVec::new(),
        }
    }

    /// Fire the first timed rule from the current state whose deadline has
    /// passed. Returns None when nothing was due.
    pub fn poll_timed(&mut self, now: Instant) -> Option<ActionVec<A>> {
        let due = self
            .timed
            .iter()
            .find(|r| r.from == self.current && now >= self.entered_at + r.after)
            .cloned()?;
        debug!("{} -> {:?} on timer ({})", self.state_name(), due.to, due.name);
        Some(self.apply(due.to, due.action, now))
    }

    /// Actions to interpret for one idle pass of the current state.
    pub fn idle_actions(&self) -> ActionVec<A> {
        self.state_def(self.current)
            .map(|d| d.idle.clone())
            .unwrap_or_default()
    }

    /// One cooperative tick: timed rules first, otherwise the idle hooks.
    pub fn tick(&mut self, now: Instant) -> ActionVec<A> {
        match self.poll_timed(now) {
            Some(actions) => actions,
            None => self.idle_actions(),
        }
    }

    /// exit(current) -> switch -> enter(new) -> rule action, in that order.
    /// Self-loops run the full sequence and reset the entry timestamp, which
    /// also re-arms any timed rules out of the state.
    fn apply(&mut self, to: S, action: Option<A>, now: Instant) -> ActionVec<A> {
        let mut out = self
            .state_def(self.current)
            .map(|d| d.exit.clone())
            .unwrap_or_default();
        self.current = to;
        self.entered_at = now;
        self.started = true;
        if let Some(def) = self.state_def(to) {
            let _ = out.extend_from_slice(&def.enter);
        }
        if let Some(a) = action {
            let _ = out.push(a);
        }
        out
    }
}
