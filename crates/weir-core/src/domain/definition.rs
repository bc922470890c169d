use crate::domain::condition::ConditionExpression;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Value object: process definition key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessKey(pub String);

/// Value object: activity id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivityId(pub String);

/// Value object: sequence flow id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub String);

/// How an activity selects outbound flows on normal completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundPolicy {
    /// Take every flow whose condition is absent or satisfied
    TakeAll,
    /// Take the first satisfied flow in declaration order, discard the rest
    ExclusiveFirstMatch,
}

/// The executable node kinds this engine models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityType {
    /// Entry point of the process; activated when the instance starts
    StartEvent,
    /// Terminal node; has no outbound flows
    EndEvent,
    /// Automatic task, completes synchronously
    Task,
    /// Automatic task backed by a registered script behavior
    ScriptTask,
    /// Interactive task; suspends at `wait` until signaled or canceled
    UserTask,
    /// Exclusive (XOR) gateway, first-match outbound selection
    ExclusiveGateway,
    /// Parallel (AND) gateway; joins on all distinct inbound, forks all outbound
    ParallelGateway,
    /// Event attached to a host activity's lifecycle
    BoundaryEvent,
}

impl ActivityType {
    /// The outbound selection rule for this type (table-driven; see DESIGN.md)
    pub fn outbound_policy(&self) -> OutboundPolicy {
        match self {
            ActivityType::ExclusiveGateway => OutboundPolicy::ExclusiveFirstMatch,
            _ => OutboundPolicy::TakeAll,
        }
    }

    /// True if the activity suspends for an external signal instead of
    /// completing synchronously
    pub fn is_interactive(&self) -> bool {
        matches!(self, ActivityType::UserTask)
    }

    /// True if activities of this type synchronize multiple inbound flows
    /// before entering (join point)
    pub fn is_joining(&self) -> bool {
        matches!(self, ActivityType::ParallelGateway)
    }
}

/// What fires a boundary event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundaryTrigger {
    /// Fired by an external timer collaborator after the given delay.
    /// `None` means the timer is driven entirely from outside the engine.
    Timer {
        /// Delay in milliseconds before the timer collaborator fires
        duration_ms: Option<u64>,
    },
    /// Fired when the host's unit of work fails
    Error,
    /// Fired by an external message addressed to the boundary event
    Message,
}

/// Attachment of a boundary event to its host activity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryDefinition {
    /// The host activity this event is attached to (back-reference only)
    pub attached_to: ActivityId,

    /// Whether firing cancels the host
    pub interrupting: bool,

    /// What fires the event
    pub trigger: BoundaryTrigger,
}

/// Represents one node in the process graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityDefinition {
    /// ID of the activity
    pub id: ActivityId,

    /// Human-readable name of the activity
    pub name: Option<String>,

    /// Node kind
    pub activity_type: ActivityType,

    /// Lane membership. Metadata only; routing ignores it.
    pub lane: Option<String>,

    /// Boundary attachment, present exactly for `BoundaryEvent` activities
    pub boundary: Option<BoundaryDefinition>,

    /// Join requirement override for parallel gateways. Defaults to the
    /// number of distinct inbound flows.
    pub required_inbound: Option<usize>,
}

impl ActivityDefinition {
    /// Create an activity of the given type
    pub fn new(id: &str, activity_type: ActivityType) -> Self {
        Self {
            id: ActivityId(id.to_string()),
            name: None,
            activity_type,
            lane: None,
            boundary: None,
            required_inbound: None,
        }
    }

    /// Create a boundary event attached to `host`
    pub fn boundary(id: &str, host: &str, interrupting: bool, trigger: BoundaryTrigger) -> Self {
        Self {
            id: ActivityId(id.to_string()),
            name: None,
            activity_type: ActivityType::BoundaryEvent,
            lane: None,
            boundary: Some(BoundaryDefinition {
                attached_to: ActivityId(host.to_string()),
                interrupting,
                trigger,
            }),
            required_inbound: None,
        }
    }

    /// Set the lane label
    pub fn in_lane(mut self, lane: &str) -> Self {
        self.lane = Some(lane.to_string());
        self
    }

    /// Override the join requirement
    pub fn with_required_inbound(mut self, count: usize) -> Self {
        self.required_inbound = Some(count);
        self
    }
}

/// Represents one directed edge in the process graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    /// ID of the flow
    pub id: FlowId,

    /// Source activity
    pub source: ActivityId,

    /// Target activity
    pub target: ActivityId,

    /// Optional guard evaluated against instance variables
    pub condition: Option<ConditionExpression>,
}

impl FlowDefinition {
    /// Create an unconditional flow
    pub fn new(id: &str, source: &str, target: &str) -> Self {
        Self {
            id: FlowId(id.to_string()),
            source: ActivityId(source.to_string()),
            target: ActivityId(target.to_string()),
            condition: None,
        }
    }

    /// Attach a guard condition
    pub fn with_condition(mut self, condition: ConditionExpression) -> Self {
        self.condition = Some(condition);
        self
    }
}

/// Represents a parsed and validated process definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Key of the process
    pub key: ProcessKey,

    /// Human-readable name of the process
    pub name: String,

    /// The activities in this process, in declaration order
    pub activities: Vec<ActivityDefinition>,

    /// The flows in this process, in declaration order
    pub flows: Vec<FlowDefinition>,
}

impl ProcessDefinition {
    /// Create an empty definition
    pub fn new(key: &str, name: &str) -> Self {
        Self {
            key: ProcessKey(key.to_string()),
            name: name.to_string(),
            activities: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Add an activity
    pub fn with_activity(mut self, activity: ActivityDefinition) -> Self {
        self.activities.push(activity);
        self
    }

    /// Add a flow
    pub fn with_flow(mut self, flow: FlowDefinition) -> Self {
        self.flows.push(flow);
        self
    }

    /// Look up an activity definition by id
    pub fn activity(&self, id: &str) -> Option<&ActivityDefinition> {
        self.activities.iter().find(|a| a.id.0 == id)
    }

    /// Validate the process definition.
    ///
    /// Definition errors are fatal at instance-start time: an instance of an
    /// invalid definition never begins.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.activities.is_empty() {
            return Err(EngineError::ValidationError(
                "Process must have at least one activity".to_string(),
            ));
        }

        // Check for activity ID uniqueness
        let mut activity_ids = HashSet::new();
        for activity in &self.activities {
            if !activity_ids.insert(activity.id.0.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate activity ID: {}",
                    activity.id.0
                )));
            }
        }

        // Check for flow ID uniqueness and valid endpoints
        let mut flow_ids = HashSet::new();
        for flow in &self.flows {
            if !flow_ids.insert(flow.id.0.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Duplicate flow ID: {}",
                    flow.id.0
                )));
            }
            if !activity_ids.contains(flow.source.0.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Flow {} references unknown source: {}",
                    flow.id.0, flow.source.0
                )));
            }
            if !activity_ids.contains(flow.target.0.as_str()) {
                return Err(EngineError::ValidationError(format!(
                    "Flow {} references unknown target: {}",
                    flow.id.0, flow.target.0
                )));
            }
        }

        let inbound_counts = self.distinct_inbound_counts();

        for activity in &self.activities {
            let is_boundary = activity.activity_type == ActivityType::BoundaryEvent;
            match (&activity.boundary, is_boundary) {
                (Some(_), false) => {
                    return Err(EngineError::ValidationError(format!(
                        "Activity {} carries a boundary attachment but is not a boundary event",
                        activity.id.0
                    )));
                }
                (None, true) => {
                    return Err(EngineError::ValidationError(format!(
                        "Boundary event {} has no host attachment",
                        activity.id.0
                    )));
                }
                _ => {}
            }

            if let Some(boundary) = &activity.boundary {
                let host = self.activity(&boundary.attached_to.0).ok_or_else(|| {
                    EngineError::ValidationError(format!(
                        "Boundary event {} references unknown host: {}",
                        activity.id.0, boundary.attached_to.0
                    ))
                })?;
                if host.activity_type == ActivityType::BoundaryEvent {
                    return Err(EngineError::ValidationError(format!(
                        "Boundary event {} cannot host another boundary event",
                        boundary.attached_to.0
                    )));
                }
                if inbound_counts.get(activity.id.0.as_str()).copied().unwrap_or(0) > 0 {
                    return Err(EngineError::ValidationError(format!(
                        "Boundary event {} must not have inbound flows",
                        activity.id.0
                    )));
                }
                if boundary.trigger == BoundaryTrigger::Error && !boundary.interrupting {
                    return Err(EngineError::ValidationError(format!(
                        "Error boundary event {} must be interrupting",
                        activity.id.0
                    )));
                }
            }

            if let Some(required) = activity.required_inbound {
                let inbound = inbound_counts
                    .get(activity.id.0.as_str())
                    .copied()
                    .unwrap_or(0);
                if required == 0 || required > inbound {
                    return Err(EngineError::ValidationError(format!(
                        "Join {} requires {} inbound flows but declares {}",
                        activity.id.0, required, inbound
                    )));
                }
            }
        }

        if !self
            .activities
            .iter()
            .any(|a| a.activity_type == ActivityType::StartEvent)
        {
            return Err(EngineError::ValidationError(
                "Process must have at least one start event".to_string(),
            ));
        }

        Ok(())
    }

    fn distinct_inbound_counts(&self) -> HashMap<&str, usize> {
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for flow in &self.flows {
            *counts.entry(flow.target.0.as_str()).or_insert(0) += 1;
        }
        counts
    }
}
