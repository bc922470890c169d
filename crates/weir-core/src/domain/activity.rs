use crate::domain::boundary::BoundaryState;
use crate::domain::definition::{ActivityDefinition, ActivityType};
use crate::domain::join::JoinState;

/// Lifecycle state of an activity.
///
/// Normal path: `Idle -> Entered -> Running -> (Waiting ->) Ending -> Left`.
/// From `Entered`, `Running` or `Waiting` a cancel stimulus moves directly to
/// `Canceled -> Left`, skipping completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Never entered (or fully left and re-enterable)
    Idle,
    /// An inbound token arrived; bound events are armed
    Entered,
    /// The unit of work is in progress
    Running,
    /// Suspended, waiting for an external signal or cancel
    Waiting,
    /// Completing: end emitted, outbound being selected
    Ending,
    /// Fully left; re-entry is allowed from here
    Left,
    /// Canceled; leaves without taking the normal outbound set
    Canceled,
}

/// Runtime node for one activity in the instance arena.
///
/// Owns the per-activity mutable state; the topology stays in the
/// definition. An activity is running or waiting for at most one logical
/// execution at a time: tokens arriving while it is active are buffered and
/// replayed after it leaves.
#[derive(Debug)]
pub struct ActivityNode {
    definition: ActivityDefinition,
    state: ActivityState,
    taken: bool,
    pending_entries: u32,
    /// Join synchronization, present on joining activity types with
    /// multiple inbound flows
    pub(crate) join: Option<JoinState>,
    /// Boundary listener attachment, meaningful for boundary events
    pub(crate) boundary: BoundaryState,
}

impl ActivityNode {
    /// Create an idle node for the given definition
    pub fn new(definition: ActivityDefinition, join: Option<JoinState>) -> Self {
        Self {
            definition,
            state: ActivityState::Idle,
            taken: false,
            pending_entries: 0,
            join,
            boundary: BoundaryState::new(),
        }
    }

    /// The activity's definition
    pub fn definition(&self) -> &ActivityDefinition {
        &self.definition
    }

    /// The activity id as a string slice
    pub fn id(&self) -> &str {
        &self.definition.id.0
    }

    /// The activity's node kind
    pub fn activity_type(&self) -> ActivityType {
        self.definition.activity_type
    }

    /// Current lifecycle state
    pub fn state(&self) -> ActivityState {
        self.state
    }

    /// Whether the activity has been reached during this execution
    pub fn taken(&self) -> bool {
        self.taken
    }

    /// Mark the activity reached (set on entry, and on a boundary event
    /// when it routes the cancellation path without executing)
    pub(crate) fn mark_taken(&mut self) {
        self.taken = true;
    }

    /// True in `Entered`, `Running` or `Waiting`
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            ActivityState::Entered | ActivityState::Running | ActivityState::Waiting
        )
    }

    /// Idle -> Entered (also Left -> Entered on re-entry)
    pub(crate) fn enter(&mut self) -> bool {
        if !matches!(self.state, ActivityState::Idle | ActivityState::Left) {
            return false;
        }
        self.state = ActivityState::Entered;
        self.taken = true;
        true
    }

    /// Entered -> Running
    pub(crate) fn start(&mut self) -> bool {
        if self.state != ActivityState::Entered {
            return false;
        }
        self.state = ActivityState::Running;
        true
    }

    /// Running -> Waiting
    pub(crate) fn suspend(&mut self) -> bool {
        if self.state != ActivityState::Running {
            return false;
        }
        self.state = ActivityState::Waiting;
        true
    }

    /// Waiting -> Running (signal received)
    pub(crate) fn resume(&mut self) -> bool {
        if self.state != ActivityState::Waiting {
            return false;
        }
        self.state = ActivityState::Running;
        true
    }

    /// Running -> Ending
    pub(crate) fn begin_completion(&mut self) -> bool {
        if self.state != ActivityState::Running {
            return false;
        }
        self.state = ActivityState::Ending;
        true
    }

    /// Entered | Running | Waiting -> Canceled
    pub(crate) fn cancel(&mut self) -> bool {
        if !self.is_active() {
            return false;
        }
        self.state = ActivityState::Canceled;
        true
    }

    /// Ending | Canceled -> Left
    pub(crate) fn leave(&mut self) -> bool {
        if !matches!(self.state, ActivityState::Ending | ActivityState::Canceled) {
            return false;
        }
        self.state = ActivityState::Left;
        true
    }

    /// Buffer a token that arrived while the activity is active
    pub(crate) fn buffer_entry(&mut self) {
        self.pending_entries += 1;
    }

    /// Consume one buffered token, if any
    pub(crate) fn take_buffered_entry(&mut self) -> bool {
        if self.pending_entries == 0 {
            return false;
        }
        self.pending_entries -= 1;
        true
    }
}
