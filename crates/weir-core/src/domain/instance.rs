use crate::domain::activity::{ActivityNode, ActivityState};
use crate::domain::bus::{BusAction, ExternalListener, SignalBus, SubscriptionId};
use crate::domain::condition::ConditionEvaluator;
use crate::domain::definition::{
    ActivityType, BoundaryTrigger, OutboundPolicy, ProcessDefinition,
};
use crate::domain::events::{ActivityEventKind, ProcessEvent};
use crate::domain::flow::{FlowState, SequenceFlow};
use crate::domain::join::{Arrival, JoinOutcome, JoinState};
use crate::error::EngineError;
use crate::types::{DataPacket, Variables};
use crate::TaskRegistry;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Value object: process instance ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    /// Generate a fresh instance id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Overall state of one process instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Created but not yet started
    Initializing,
    /// Executing (or suspended at one or more waiting activities)
    Running,
    /// All activities idle or left; the process-wide end event was emitted
    Completed,
    /// An activity failed with no error boundary to catch it
    Failed,
}

/// Unit of work on the instance's internal queue.
///
/// Transitions run to completion; the queue only carries the hand-offs
/// between them, which is what makes event delivery follow emission order.
#[derive(Debug, Clone, Copy)]
enum WorkItem {
    Enter { node: usize },
    Run { node: usize },
    Complete { node: usize },
    DeliverTaken { flow: usize },
    DeliverDiscard { flow: usize },
}

/// One running execution of a process definition.
///
/// Owns every activity node and sequence flow in a single arena, indexed by
/// element id; nothing holds references across nodes. All state transitions
/// are driven single-threadedly by draining the internal work queue, so
/// within one transition no listener can observe a partially updated
/// instance.
pub struct ProcessInstance {
    id: InstanceId,
    definition: Arc<ProcessDefinition>,
    nodes: Vec<ActivityNode>,
    flows: Vec<SequenceFlow>,
    node_index: HashMap<String, usize>,
    outbound: Vec<Vec<usize>>,
    attached: Vec<Vec<usize>>,
    flow_targets: Vec<usize>,
    variables: Variables,
    bus: SignalBus,
    queue: VecDeque<WorkItem>,
    state: InstanceState,
    evaluator: Arc<dyn ConditionEvaluator>,
    tasks: Arc<TaskRegistry>,
}

impl ProcessInstance {
    /// Build an instance over a validated definition.
    ///
    /// Definition errors are fatal here: an instance of an invalid
    /// definition never begins (the caller sees the validation error).
    pub fn new(
        definition: Arc<ProcessDefinition>,
        variables: DataPacket,
        evaluator: Arc<dyn ConditionEvaluator>,
        tasks: Arc<TaskRegistry>,
    ) -> Result<Self, EngineError> {
        definition.validate()?;

        let variables = Variables::from_packet(variables).ok_or_else(|| {
            EngineError::ValidationError(
                "Initial process variables must be an object or null".to_string(),
            )
        })?;

        let mut node_index = HashMap::new();
        for (idx, activity) in definition.activities.iter().enumerate() {
            node_index.insert(activity.id.0.clone(), idx);
        }

        let flows: Vec<SequenceFlow> = definition
            .flows
            .iter()
            .map(|f| SequenceFlow::new(f.clone()))
            .collect();

        let mut outbound = vec![Vec::new(); definition.activities.len()];
        let mut inbound = vec![Vec::new(); definition.activities.len()];
        let mut flow_targets = Vec::with_capacity(flows.len());
        for (fidx, flow) in definition.flows.iter().enumerate() {
            let source = node_index[&flow.source.0];
            let target = node_index[&flow.target.0];
            outbound[source].push(fidx);
            inbound[target].push(fidx);
            flow_targets.push(target);
        }

        let mut attached = vec![Vec::new(); definition.activities.len()];
        for (idx, activity) in definition.activities.iter().enumerate() {
            if let Some(boundary) = &activity.boundary {
                let host = node_index[&boundary.attached_to.0];
                attached[host].push(idx);
            }
        }

        let nodes: Vec<ActivityNode> = definition
            .activities
            .iter()
            .enumerate()
            .map(|(idx, activity)| {
                let join = if activity.activity_type.is_joining() && inbound[idx].len() > 1 {
                    let required = activity.required_inbound.unwrap_or(inbound[idx].len());
                    Some(JoinState::new(required))
                } else {
                    None
                };
                ActivityNode::new(activity.clone(), join)
            })
            .collect();

        let id = InstanceId::generate();
        Ok(Self {
            id,
            definition,
            nodes,
            flows,
            node_index,
            outbound,
            attached,
            flow_targets,
            variables,
            bus: SignalBus::new(),
            queue: VecDeque::new(),
            state: InstanceState::Initializing,
            evaluator,
            tasks,
        })
    }

    /// The instance id
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// The definition this instance executes
    pub fn definition(&self) -> &ProcessDefinition {
        &self.definition
    }

    /// Current overall state
    pub fn state(&self) -> InstanceState {
        self.state
    }

    /// The instance variable scope
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    // ── External stimuli ────────────────────────────────────────

    /// Begin execution at the start events.
    pub fn start(&mut self) -> Result<(), EngineError> {
        if self.state != InstanceState::Initializing {
            return Err(EngineError::InstanceExecutionError(format!(
                "Cannot start instance in state: {:?}",
                self.state
            )));
        }
        info!(instance = %self.id.0, process = %self.definition.key.0, "starting instance");
        self.state = InstanceState::Running;

        let starts: Vec<usize> = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.activity_type() == ActivityType::StartEvent)
            .map(|(idx, _)| idx)
            .collect();
        for idx in starts {
            self.queue.push_back(WorkItem::Enter { node: idx });
        }
        self.drain();
        Ok(())
    }

    /// Resume a waiting activity with signal data.
    ///
    /// Valid only while the activity is waiting; anything else is a silent
    /// no-op because external callers may race with natural completion. A
    /// signal addressed to an armed message boundary event fires it.
    pub fn signal(&mut self, activity_id: &str, data: DataPacket) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;

        if self.nodes[idx].activity_type() == ActivityType::BoundaryEvent {
            return self.trigger(activity_id);
        }

        if !self.nodes[idx].resume() {
            debug!(instance = %self.id.0, activity = activity_id, "signal ignored");
            return Ok(());
        }

        self.variables.merge(&data);
        self.queue.push_back(WorkItem::Complete { node: idx });
        self.drain();
        Ok(())
    }

    /// Cancel an activity.
    ///
    /// Valid while the activity is entered, running or waiting; otherwise a
    /// silent no-op. The canceled activity never takes its normal outbound
    /// set; armed boundary events route the cancellation path instead.
    pub fn cancel(&mut self, activity_id: &str) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;
        if !self.nodes[idx].is_active() {
            debug!(instance = %self.id.0, activity = activity_id, "cancel ignored");
            return Ok(());
        }
        self.cancel_activity(idx, None, true);
        self.drain();
        Ok(())
    }

    /// Fire a boundary event from an external collaborator (timer, message).
    ///
    /// Ignored unless the event is currently armed, so a timer racing with
    /// host completion is harmless.
    pub fn trigger(&mut self, activity_id: &str) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;
        if self.nodes[idx].activity_type() != ActivityType::BoundaryEvent
            || !self.nodes[idx].boundary.armed()
        {
            debug!(instance = %self.id.0, activity = activity_id, "trigger ignored");
            return Ok(());
        }
        self.queue.push_back(WorkItem::Enter { node: idx });
        self.drain();
        Ok(())
    }

    /// Run an activity directly, outside normal inbound routing.
    ///
    /// This is the listener-side `run()` stimulus; it enters the activity as
    /// if a token had arrived.
    pub fn run_activity(&mut self, activity_id: &str) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;
        self.queue.push_back(WorkItem::Enter { node: idx });
        self.drain();
        Ok(())
    }

    // ── Boundary listener protocol ──────────────────────────────

    /// Arm the bound-event listeners of an activity.
    ///
    /// Idempotent: repeated calls leave exactly one `end` and one `cancel`
    /// listener per bound event. Called automatically on enter.
    pub fn setup_bound_event_listeners(&mut self, activity_id: &str) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;
        self.setup_bound_events(idx);
        Ok(())
    }

    /// Disarm the bound-event listeners of an activity.
    ///
    /// Idempotent: safe when already torn down or never set up; leaves zero
    /// listeners per bound event. Called automatically on leave.
    pub fn teardown_bound_event_listeners(&mut self, activity_id: &str) -> Result<(), EngineError> {
        let idx = self.node_idx(activity_id)?;
        self.teardown_bound_events(idx);
        Ok(())
    }

    // ── Observation ─────────────────────────────────────────────

    /// Look up an activity and observe its state, outbound flows and bound
    /// events.
    pub fn child_activity_by_id(&self, activity_id: &str) -> Option<ActivitySnapshot> {
        let idx = *self.node_index.get(activity_id)?;
        Some(self.activity_snapshot(idx))
    }

    /// Snapshot the whole instance
    pub fn snapshot(&self) -> InstanceSnapshot {
        InstanceSnapshot {
            id: self.id.clone(),
            state: self.state,
            variables: self.variables.clone(),
            activities: (0..self.nodes.len())
                .map(|idx| self.activity_snapshot(idx))
                .collect(),
            internal_listeners: self.bus.internal_listener_count(),
        }
    }

    /// Number of listeners registered for (element, kind)
    pub fn listener_count(&self, element_id: &str, kind: ActivityEventKind) -> usize {
        self.bus.listener_count(element_id, kind)
    }

    /// Number of engine-internal listeners still registered
    pub fn internal_listener_count(&self) -> usize {
        self.bus.internal_listener_count()
    }

    /// Register an external listener for (element, kind)
    pub fn subscribe(
        &mut self,
        element_id: &str,
        kind: ActivityEventKind,
        listener: ExternalListener,
    ) -> SubscriptionId {
        self.bus.subscribe(element_id, kind, listener)
    }

    /// Register an external listener for every event of this instance
    pub fn subscribe_all(&mut self, listener: ExternalListener) -> SubscriptionId {
        self.bus.subscribe_all(listener)
    }

    /// Remove an external listener
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.bus.unsubscribe(id);
    }

    /// Drain the events emitted since the last call, in emission order
    pub fn take_events(&mut self) -> Vec<ProcessEvent> {
        self.bus.take_events()
    }

    // ── Transition machinery ────────────────────────────────────

    fn node_idx(&self, activity_id: &str) -> Result<usize, EngineError> {
        self.node_index
            .get(activity_id)
            .copied()
            .ok_or_else(|| EngineError::ActivityNotFound(activity_id.to_string()))
    }

    fn drain(&mut self) {
        while let Some(item) = self.queue.pop_front() {
            match item {
                WorkItem::Enter { node } => self.enter_activity(node),
                WorkItem::Run { node } => self.run_node(node),
                WorkItem::Complete { node } => self.complete_activity(node),
                WorkItem::DeliverTaken { flow } => self.deliver_taken(flow),
                WorkItem::DeliverDiscard { flow } => self.deliver_discard(flow),
            }
        }
        self.check_for_end();
    }

    fn emit_element(&mut self, element_id: &str, kind: ActivityEventKind) {
        let event = ProcessEvent::element(self.id.clone(), element_id, kind);
        let actions = self.bus.emit(event);
        self.apply_actions(actions);
    }

    fn emit_error(&mut self, element_id: &str, message: &str) {
        let event = ProcessEvent::element(self.id.clone(), element_id, ActivityEventKind::Error)
            .with_message(message.to_string());
        let actions = self.bus.emit(event);
        self.apply_actions(actions);
    }

    fn apply_actions(&mut self, actions: Vec<BusAction>) {
        for action in actions {
            match action {
                BusAction::BoundaryFired {
                    host,
                    boundary,
                    interrupting,
                } => {
                    // Single shot: the fired event's listener pair goes away.
                    self.nodes[boundary].boundary.disarm(&mut self.bus);
                    if interrupting {
                        self.cancel_activity(host, Some(boundary), true);
                    }
                }
                BusAction::BoundaryCanceled { boundary, .. } => {
                    // Host canceled from outside: the boundary event routes
                    // the cancellation path through its own outbound.
                    self.nodes[boundary].boundary.disarm(&mut self.bus);
                    self.nodes[boundary].mark_taken();
                    for flow in self.outbound[boundary].clone() {
                        self.take_flow(flow);
                    }
                }
            }
        }
    }

    fn setup_bound_events(&mut self, host: usize) {
        for boundary in self.attached[host].clone() {
            let element_id = self.nodes[boundary].id().to_string();
            let interrupting = self.nodes[boundary]
                .definition()
                .boundary
                .as_ref()
                .map(|b| b.interrupting)
                .unwrap_or(true);
            self.nodes[boundary]
                .boundary
                .arm(&mut self.bus, &element_id, host, boundary, interrupting);
        }
    }

    /// Disarm all bound events of `host`; returns those that were still armed.
    fn teardown_bound_events(&mut self, host: usize) -> Vec<usize> {
        let mut disarmed = Vec::new();
        for boundary in self.attached[host].clone() {
            if self.nodes[boundary].boundary.disarm(&mut self.bus) {
                disarmed.push(boundary);
            }
        }
        disarmed
    }

    fn enter_activity(&mut self, idx: usize) {
        if !self.nodes[idx].enter() {
            if self.nodes[idx].activity_type() == ActivityType::BoundaryEvent {
                // A boundary event executes once per arming; duplicate fires
                // are dropped, not buffered.
                debug!(instance = %self.id.0, activity = self.nodes[idx].id(), "duplicate boundary fire ignored");
            } else {
                // A token arrived while the activity is active; replay it
                // after the current execution leaves.
                self.nodes[idx].buffer_entry();
            }
            return;
        }

        // New execution pass: this activity's outbound flows start pending.
        for flow in self.outbound[idx].clone() {
            self.flows[flow].reset();
        }

        // Bound events are armed before anything else happens, so a boundary
        // event can never be armed after work has started.
        self.setup_bound_events(idx);

        let id = self.nodes[idx].id().to_string();
        self.emit_element(&id, ActivityEventKind::Enter);
        self.queue.push_back(WorkItem::Run { node: idx });
    }

    fn run_node(&mut self, idx: usize) {
        if !self.nodes[idx].start() {
            // Canceled between enter and run.
            return;
        }

        let id = self.nodes[idx].id().to_string();
        let activity_type = self.nodes[idx].activity_type();
        self.emit_element(&id, ActivityEventKind::Start);

        if activity_type.is_interactive() {
            if self.nodes[idx].suspend() {
                self.emit_element(&id, ActivityEventKind::Wait);
            }
            return;
        }

        if matches!(activity_type, ActivityType::Task | ActivityType::ScriptTask) {
            if let Some(behavior) = self.tasks.get(&id) {
                if let Err(error) = behavior.execute(&mut self.variables) {
                    self.fail_activity(idx, &error.to_string());
                    return;
                }
            }
        }

        self.queue.push_back(WorkItem::Complete { node: idx });
    }

    fn complete_activity(&mut self, idx: usize) {
        if !self.nodes[idx].begin_completion() {
            // Canceled while the completion was queued.
            return;
        }

        let id = self.nodes[idx].id().to_string();
        let activity_type = self.nodes[idx].activity_type();

        // A boundary event's own end is what its armed listener reacts to:
        // this emission cancels the host when the event interrupts.
        self.emit_element(&id, ActivityEventKind::End);

        let routing = if activity_type == ActivityType::EndEvent {
            Ok((Vec::new(), Vec::new()))
        } else {
            self.select_outbound(idx)
        };

        let (taken, discarded) = match routing {
            Ok(selection) => selection,
            Err(error) => {
                let message = error.to_string();
                self.emit_error(&id, &message);
                self.teardown_bound_events(idx);
                self.emit_element(&id, ActivityEventKind::Leave);
                self.nodes[idx].leave();
                self.fail_instance(&message);
                return;
            }
        };

        for flow in taken {
            self.take_flow(flow);
        }
        for flow in discarded {
            self.discard_flow(flow);
        }

        // Unfired bound events are dead paths now.
        for boundary in self.teardown_bound_events(idx) {
            for flow in self.outbound[boundary].clone() {
                self.discard_flow(flow);
            }
        }

        self.emit_element(&id, ActivityEventKind::Leave);
        self.nodes[idx].leave();
        self.replay_buffered(idx);
    }

    fn cancel_activity(&mut self, idx: usize, by_boundary: Option<usize>, route_boundaries: bool) {
        if !self.nodes[idx].cancel() {
            debug!(instance = %self.id.0, activity = self.nodes[idx].id(), "cancel ignored");
            return;
        }

        let id = self.nodes[idx].id().to_string();

        // Release the remaining armed bound events. Under normal
        // cancellation their cancel listeners route the cancellation path;
        // during instance failure they are torn down silently.
        for boundary in self.attached[idx].clone() {
            if Some(boundary) == by_boundary || !self.nodes[boundary].boundary.armed() {
                continue;
            }
            if route_boundaries {
                let element_id = self.nodes[boundary].id().to_string();
                self.emit_element(&element_id, ActivityEventKind::Cancel);
            } else {
                self.nodes[boundary].boundary.disarm(&mut self.bus);
                for flow in self.outbound[boundary].clone() {
                    self.discard_flow(flow);
                }
            }
        }

        // Cancellation never takes the normal outbound set.
        for flow in self.outbound[idx].clone() {
            self.discard_flow(flow);
        }

        self.emit_element(&id, ActivityEventKind::Cancel);
        self.emit_element(&id, ActivityEventKind::Leave);
        self.nodes[idx].leave();
        self.replay_buffered(idx);
    }

    fn fail_activity(&mut self, idx: usize, message: &str) {
        let id = self.nodes[idx].id().to_string();
        warn!(instance = %self.id.0, activity = %id, error = message, "activity failed");
        self.emit_error(&id, message);

        let error_boundary = self.attached[idx].iter().copied().find(|&b| {
            self.nodes[b].boundary.armed()
                && self.nodes[b]
                    .definition()
                    .boundary
                    .as_ref()
                    .map(|d| d.trigger == BoundaryTrigger::Error)
                    .unwrap_or(false)
        });

        match error_boundary {
            Some(boundary) => {
                // The error boundary consumes the failure; it is always
                // interrupting, so its completion cancels this activity.
                self.queue.push_back(WorkItem::Enter { node: boundary });
            }
            None => self.fail_instance(message),
        }
    }

    fn fail_instance(&mut self, message: &str) {
        if self.state != InstanceState::Running {
            return;
        }
        warn!(instance = %self.id.0, error = message, "instance failed");

        for idx in 0..self.nodes.len() {
            if self.nodes[idx].is_active() {
                self.cancel_activity(idx, None, false);
            }
        }
        self.queue.clear();
        self.state = InstanceState::Failed;

        let event =
            ProcessEvent::instance_ended(self.id.clone()).with_message(message.to_string());
        let actions = self.bus.emit(event);
        self.apply_actions(actions);
    }

    fn select_outbound(&self, idx: usize) -> Result<(Vec<usize>, Vec<usize>), EngineError> {
        let flows = self.outbound[idx].clone();
        if flows.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let policy = self.nodes[idx].activity_type().outbound_policy();
        let variables = self.variables.as_value();
        let mut taken = Vec::new();
        let mut discarded = Vec::new();

        match policy {
            OutboundPolicy::TakeAll => {
                for flow in flows {
                    if self.flow_satisfied(flow, &variables)? {
                        taken.push(flow);
                    } else {
                        discarded.push(flow);
                    }
                }
            }
            OutboundPolicy::ExclusiveFirstMatch => {
                for flow in flows {
                    if taken.is_empty() && self.flow_satisfied(flow, &variables)? {
                        taken.push(flow);
                    } else {
                        discarded.push(flow);
                    }
                }
                if taken.is_empty() {
                    return Err(EngineError::ActivityExecutionError(format!(
                        "Exclusive gateway {} has no satisfied outbound flow",
                        self.nodes[idx].id()
                    )));
                }
            }
        }

        Ok((taken, discarded))
    }

    fn flow_satisfied(
        &self,
        flow: usize,
        variables: &serde_json::Value,
    ) -> Result<bool, EngineError> {
        match &self.flows[flow].definition().condition {
            None => Ok(true),
            Some(condition) => {
                self.evaluator
                    .evaluate(&condition.expression, &condition.language, variables)
            }
        }
    }

    fn take_flow(&mut self, flow: usize) {
        if !self.flows[flow].take() {
            return;
        }
        let flow_id = self.flows[flow].id().to_string();
        self.emit_element(&flow_id, ActivityEventKind::Taken);
        self.queue.push_back(WorkItem::DeliverTaken { flow });
    }

    fn discard_flow(&mut self, flow: usize) {
        if !self.flows[flow].discard() {
            return;
        }
        self.queue.push_back(WorkItem::DeliverDiscard { flow });
    }

    fn deliver_taken(&mut self, flow: usize) {
        let target = self.flow_targets[flow];
        let outcome = self.nodes[target]
            .join
            .as_mut()
            .map(|join| join.arrive(flow, Arrival::Taken));

        match outcome {
            None | Some(JoinOutcome::Activate) => self.enter_activity(target),
            Some(JoinOutcome::Waiting) => {}
            // A taken arrival always yields an activation when it completes
            // the set, but keep the discard arm total.
            Some(JoinOutcome::Discard) => self.forward_discard(target),
        }
    }

    fn deliver_discard(&mut self, flow: usize) {
        let target = self.flow_targets[flow];
        let outcome = self.nodes[target]
            .join
            .as_mut()
            .map(|join| join.arrive(flow, Arrival::Discarded));

        match outcome {
            Some(JoinOutcome::Waiting) => {}
            Some(JoinOutcome::Activate) => self.enter_activity(target),
            Some(JoinOutcome::Discard) => self.forward_discard(target),
            None => {
                // Dead-path elimination flows straight through inactive
                // activities; an active one will route when it completes.
                if !self.nodes[target].is_active() {
                    self.forward_discard(target);
                }
            }
        }
    }

    fn forward_discard(&mut self, idx: usize) {
        for flow in self.outbound[idx].clone() {
            self.discard_flow(flow);
        }
    }

    fn replay_buffered(&mut self, idx: usize) {
        if self.nodes[idx].take_buffered_entry() {
            self.queue.push_back(WorkItem::Enter { node: idx });
        }
    }

    fn check_for_end(&mut self) {
        if self.state != InstanceState::Running {
            return;
        }
        if self.nodes.iter().any(|n| n.is_active()) {
            return;
        }

        self.state = InstanceState::Completed;
        info!(instance = %self.id.0, "instance completed");

        let event = ProcessEvent::instance_ended(self.id.clone());
        let actions = self.bus.emit(event);
        self.apply_actions(actions);

        debug_assert_eq!(self.bus.internal_listener_count(), 0);
    }

    fn activity_snapshot(&self, idx: usize) -> ActivitySnapshot {
        let node = &self.nodes[idx];
        ActivitySnapshot {
            id: node.id().to_string(),
            activity_type: node.activity_type(),
            lane: node.definition().lane.clone(),
            state: node.state(),
            taken: node.taken(),
            outbound: self.outbound[idx]
                .iter()
                .map(|&f| {
                    let flow = &self.flows[f];
                    FlowSnapshot {
                        id: flow.id().to_string(),
                        source: flow.definition().source.0.clone(),
                        target: flow.definition().target.0.clone(),
                        state: flow.state(),
                        taken: flow.taken(),
                    }
                })
                .collect(),
            bound_events: self.attached[idx]
                .iter()
                .map(|&b| {
                    let boundary = &self.nodes[b];
                    BoundarySnapshot {
                        id: boundary.id().to_string(),
                        interrupting: boundary
                            .definition()
                            .boundary
                            .as_ref()
                            .map(|d| d.interrupting)
                            .unwrap_or(true),
                        armed: boundary.boundary.armed(),
                        taken: boundary.taken(),
                    }
                })
                .collect(),
        }
    }
}

/// Observable state of one sequence flow
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    /// Flow id
    pub id: String,
    /// Source activity id
    pub source: String,
    /// Target activity id
    pub target: String,
    /// Routing state this pass
    pub state: FlowState,
    /// True if a token traversed the flow
    pub taken: bool,
}

/// Observable state of one bound event
#[derive(Debug, Clone)]
pub struct BoundarySnapshot {
    /// Boundary event id
    pub id: String,
    /// Whether firing cancels the host
    pub interrupting: bool,
    /// Whether the listener pair is currently registered
    pub armed: bool,
    /// Whether the event was reached during this execution
    pub taken: bool,
}

/// Observable state of one activity, per the lookup contract
#[derive(Debug, Clone)]
pub struct ActivitySnapshot {
    /// Activity id
    pub id: String,
    /// Node kind
    pub activity_type: ActivityType,
    /// Lane membership (metadata only)
    pub lane: Option<String>,
    /// Lifecycle state
    pub state: ActivityState,
    /// Whether the activity was reached during this execution
    pub taken: bool,
    /// Outbound flows with their routing state
    pub outbound: Vec<FlowSnapshot>,
    /// Bound events attached to this activity
    pub bound_events: Vec<BoundarySnapshot>,
}

/// Observable state of one instance
#[derive(Debug, Clone)]
pub struct InstanceSnapshot {
    /// Instance id
    pub id: InstanceId,
    /// Overall state
    pub state: InstanceState,
    /// Variable scope
    pub variables: Variables,
    /// All activities, in declaration order
    pub activities: Vec<ActivitySnapshot>,
    /// Engine-internal listeners still registered on the bus
    pub internal_listeners: usize,
}

impl InstanceSnapshot {
    /// Look up an activity snapshot by id
    pub fn activity(&self, id: &str) -> Option<&ActivitySnapshot> {
        self.activities.iter().find(|a| a.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::condition::{ConditionExpression, JmesPathEvaluator};
    use crate::domain::definition::{ActivityDefinition, FlowDefinition};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn build(
        definition: ProcessDefinition,
        variables: serde_json::Value,
        tasks: TaskRegistry,
    ) -> ProcessInstance {
        ProcessInstance::new(
            Arc::new(definition),
            DataPacket::new(variables),
            Arc::new(JmesPathEvaluator),
            Arc::new(tasks),
        )
        .unwrap()
    }

    /// A user task guarded by one interrupting timer boundary event; both
    /// the task path and the boundary path converge on a parallel join.
    fn boundary_process(interrupting: bool) -> ProcessDefinition {
        ProcessDefinition::new("boundary", "Boundary timeout")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("userTask", ActivityType::UserTask))
            .with_activity(ActivityDefinition::boundary(
                "boundTimer",
                "userTask",
                interrupting,
                BoundaryTrigger::Timer { duration_ms: None },
            ))
            .with_activity(ActivityDefinition::new("join", ActivityType::ParallelGateway))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "userTask"))
            .with_flow(FlowDefinition::new("f2", "userTask", "join"))
            .with_flow(FlowDefinition::new("f3", "boundTimer", "join"))
            .with_flow(FlowDefinition::new("f4", "join", "end"))
    }

    #[test]
    fn test_bound_events_stored_with_task() {
        let instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        let task = instance.child_activity_by_id("userTask").unwrap();

        assert_eq!(task.bound_events.len(), 1);
        assert_eq!(task.bound_events[0].id, "boundTimer");
        assert!(task.bound_events[0].interrupting);
    }

    #[test]
    fn test_listeners_attached_when_run() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.run_activity("userTask").unwrap();

        assert_eq!(instance.listener_count("boundTimer", ActivityEventKind::End), 1);
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Cancel),
            1
        );
    }

    #[test]
    fn test_listeners_removed_when_completed() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.start().unwrap();
        instance.signal("userTask", DataPacket::null()).unwrap();

        assert_eq!(instance.listener_count("boundTimer", ActivityEventKind::End), 0);
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Cancel),
            0
        );
    }

    #[test]
    fn test_setup_bound_event_listeners_idempotent() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());

        instance.setup_bound_event_listeners("userTask").unwrap();
        instance.setup_bound_event_listeners("userTask").unwrap();

        assert_eq!(instance.listener_count("boundTimer", ActivityEventKind::End), 1);
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Cancel),
            1
        );
    }

    #[test]
    fn test_teardown_bound_event_listeners_idempotent() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());

        instance.setup_bound_event_listeners("userTask").unwrap();
        instance.teardown_bound_event_listeners("userTask").unwrap();
        instance.teardown_bound_event_listeners("userTask").unwrap();

        assert_eq!(instance.listener_count("boundTimer", ActivityEventKind::End), 0);
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Cancel),
            0
        );

        // Never set up at all is also safe.
        let mut fresh = build(boundary_process(true), json!({}), TaskRegistry::new());
        fresh.teardown_bound_event_listeners("userTask").unwrap();
        assert_eq!(fresh.listener_count("boundTimer", ActivityEventKind::End), 0);
    }

    #[test]
    fn test_cancel_takes_cancellation_path() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.start().unwrap();

        let task = instance.child_activity_by_id("userTask").unwrap();
        assert_eq!(task.state, ActivityState::Waiting);

        instance.cancel("userTask").unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        assert!(instance.child_activity_by_id("join").unwrap().taken, "join");
        assert!(instance.child_activity_by_id("end").unwrap().taken, "end");
        assert_eq!(instance.internal_listener_count(), 0);

        // The canceled task never completed.
        let events = instance.take_events();
        assert!(events.iter().any(|e| e.matches("userTask", ActivityEventKind::Cancel)));
        assert!(!events.iter().any(|e| e.matches("userTask", ActivityEventKind::End)));
        assert!(events.iter().any(|e| e.is_instance_end()));
    }

    #[test]
    fn test_interrupting_boundary_cancels_host() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.start().unwrap();

        instance.trigger("boundTimer").unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        let task = instance.child_activity_by_id("userTask").unwrap();
        assert_eq!(task.state, ActivityState::Left);
        assert!(instance.child_activity_by_id("join").unwrap().taken);
        assert!(instance.child_activity_by_id("end").unwrap().taken);

        let events = instance.take_events();
        assert!(events.iter().any(|e| e.matches("userTask", ActivityEventKind::Cancel)));
        assert!(!events.iter().any(|e| e.matches("userTask", ActivityEventKind::End)));
        assert!(events.iter().any(|e| e.matches("boundTimer", ActivityEventKind::End)));
    }

    #[test]
    fn test_non_interrupting_boundary_leaves_host_running() {
        let mut instance = build(boundary_process(false), json!({}), TaskRegistry::new());
        instance.start().unwrap();

        instance.trigger("boundTimer").unwrap();

        // The host is still waiting and can be resumed normally.
        let task = instance.child_activity_by_id("userTask").unwrap();
        assert_eq!(task.state, ActivityState::Waiting);

        instance.signal("userTask", DataPacket::null()).unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        let events = instance.take_events();
        assert!(!events.iter().any(|e| e.matches("userTask", ActivityEventKind::Cancel)));
        assert!(events.iter().any(|e| e.matches("userTask", ActivityEventKind::End)));
        assert!(events.iter().any(|e| e.matches("boundTimer", ActivityEventKind::End)));
    }

    #[test]
    fn test_signal_outside_waiting_is_ignored() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());

        // Not yet started: nothing is waiting.
        instance.signal("userTask", DataPacket::null()).unwrap();
        assert_eq!(instance.state(), InstanceState::Initializing);

        instance.start().unwrap();
        instance.signal("userTask", DataPacket::null()).unwrap();
        assert_eq!(instance.state(), InstanceState::Completed);

        // Racing a second signal after completion is tolerated.
        instance.signal("userTask", DataPacket::null()).unwrap();
        instance.cancel("userTask").unwrap();
        assert_eq!(instance.state(), InstanceState::Completed);
    }

    #[test]
    fn test_signal_unknown_activity_is_an_error() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        let result = instance.signal("ghost", DataPacket::null());

        assert!(matches!(result, Err(EngineError::ActivityNotFound(_))));
    }

    #[test]
    fn test_trigger_disarmed_boundary_is_ignored() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());

        // Host not entered, boundary not armed.
        instance.trigger("boundTimer").unwrap();
        assert_eq!(instance.state(), InstanceState::Initializing);

        instance.start().unwrap();
        instance.signal("userTask", DataPacket::null()).unwrap();

        // Late timer fire after the host completed.
        instance.trigger("boundTimer").unwrap();
        assert_eq!(instance.state(), InstanceState::Completed);
        let timer = instance.child_activity_by_id("boundTimer").unwrap();
        assert!(!timer.taken);
    }

    #[test]
    fn test_normal_completion_discards_boundary_path() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.start().unwrap();
        instance.signal("userTask", DataPacket::null()).unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        assert!(instance.child_activity_by_id("join").unwrap().taken);
        assert!(instance.child_activity_by_id("end").unwrap().taken);

        // The boundary path was eliminated, not taken.
        let timer = instance.child_activity_by_id("boundTimer").unwrap();
        assert!(!timer.taken);
        assert_eq!(timer.outbound[0].state, FlowState::Discarded);
    }

    #[test]
    fn test_parallel_fork_and_join() {
        let definition = ProcessDefinition::new("diamond", "Fork and join")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("fork", ActivityType::ParallelGateway))
            .with_activity(ActivityDefinition::new("taskA", ActivityType::Task))
            .with_activity(ActivityDefinition::new("taskB", ActivityType::Task))
            .with_activity(ActivityDefinition::new("join", ActivityType::ParallelGateway))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "fork"))
            .with_flow(FlowDefinition::new("f2", "fork", "taskA"))
            .with_flow(FlowDefinition::new("f3", "fork", "taskB"))
            .with_flow(FlowDefinition::new("f4", "taskA", "join"))
            .with_flow(FlowDefinition::new("f5", "taskB", "join"))
            .with_flow(FlowDefinition::new("f6", "join", "end"))
            ;

        let mut instance = build(definition, json!({}), TaskRegistry::new());
        instance.start().unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);

        // The join activated exactly once for two inbound completions.
        let events = instance.take_events();
        let join_starts = events
            .iter()
            .filter(|e| e.matches("join", ActivityEventKind::Start))
            .count();
        assert_eq!(join_starts, 1);
        assert!(instance.child_activity_by_id("end").unwrap().taken);
    }

    #[test]
    fn test_data_guarded_loop_terminates() {
        let mut tasks = TaskRegistry::new();
        tasks.register("script", |variables: &mut Variables| {
            let runs = variables.get("runs").and_then(|v| v.as_i64()).unwrap_or(0);
            variables.set("runs", json!(runs + 1));
            Ok(())
        });

        let definition = ProcessDefinition::new("loop", "Guarded loop")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("script", ActivityType::ScriptTask))
            .with_activity(ActivityDefinition::new("review", ActivityType::UserTask))
            .with_activity(ActivityDefinition::new(
                "decision",
                ActivityType::ExclusiveGateway,
            ))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "script"))
            .with_flow(FlowDefinition::new("f2", "script", "review"))
            .with_flow(FlowDefinition::new("f3", "review", "decision"))
            .with_flow(
                FlowDefinition::new("loopBack", "decision", "script")
                    .with_condition(ConditionExpression::jmespath("input < `3`")),
            )
            .with_flow(
                FlowDefinition::new("exit", "decision", "end")
                    .with_condition(ConditionExpression::jmespath("input >= `3`")),
            );

        let mut instance = build(definition, json!({"input": 0}), tasks);
        instance.start().unwrap();

        let mut input = 0;
        while instance.state() == InstanceState::Running {
            let review = instance.child_activity_by_id("review").unwrap();
            assert_eq!(review.state, ActivityState::Waiting);
            input += 1;
            instance
                .signal("review", DataPacket::new(json!({ "input": input })))
                .unwrap();
            assert!(input <= 10, "loop did not terminate");
        }

        assert_eq!(instance.state(), InstanceState::Completed);

        // The guard flipped after three passes; the script never ran again.
        let events = instance.take_events();
        let script_runs = events
            .iter()
            .filter(|e| e.matches("script", ActivityEventKind::Start))
            .count();
        assert_eq!(script_runs, 3);
        assert_eq!(
            instance.variables().get("runs"),
            Some(&json!(3))
        );
    }

    #[test]
    fn test_lane_crossing_outbound_count() {
        let definition = ProcessDefinition::new("lanes", "Lanes")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent).in_lane("first"))
            .with_activity(ActivityDefinition::new("task1", ActivityType::Task).in_lane("first"))
            .with_activity(ActivityDefinition::new("task2", ActivityType::UserTask).in_lane("second"))
            .with_activity(ActivityDefinition::new("join", ActivityType::ParallelGateway).in_lane("second"))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent).in_lane("second"))
            .with_flow(FlowDefinition::new("f1", "start", "task1"))
            .with_flow(FlowDefinition::new("f2", "task1", "task2"))
            .with_flow(FlowDefinition::new("f3", "task1", "join"))
            .with_flow(FlowDefinition::new("f4", "task2", "join"))
            .with_flow(FlowDefinition::new("f5", "join", "end"));

        let instance = build(definition, json!({}), TaskRegistry::new());
        let task = instance.child_activity_by_id("task1").unwrap();

        // Outbound reflects the declared count even across lane boundaries.
        assert_eq!(task.outbound.len(), 2);
        assert_eq!(task.lane.as_deref(), Some("first"));
    }

    #[test]
    fn test_task_failure_without_error_boundary_fails_instance() {
        let mut tasks = TaskRegistry::new();
        tasks.register("task", |_: &mut Variables| {
            Err(EngineError::TaskError("verification failed".to_string()))
        });

        let definition = ProcessDefinition::new("failing", "Failing task")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("task", ActivityType::Task))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "task"))
            .with_flow(FlowDefinition::new("f2", "task", "end"));

        let mut instance = build(definition, json!({}), tasks);
        instance.start().unwrap();

        assert_eq!(instance.state(), InstanceState::Failed);
        assert_eq!(instance.internal_listener_count(), 0);
        assert!(!instance.child_activity_by_id("end").unwrap().taken);

        let events = instance.take_events();
        assert!(events.iter().any(|e| e.matches("task", ActivityEventKind::Error)));
        assert!(events.iter().any(|e| e.is_instance_end()));
    }

    #[test]
    fn test_task_failure_with_error_boundary_routes_recovery() {
        let mut tasks = TaskRegistry::new();
        tasks.register("task", |_: &mut Variables| {
            Err(EngineError::TaskError("verification failed".to_string()))
        });

        let definition = ProcessDefinition::new("recovering", "Recovering task")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("task", ActivityType::Task))
            .with_activity(ActivityDefinition::boundary(
                "catchError",
                "task",
                true,
                BoundaryTrigger::Error,
            ))
            .with_activity(ActivityDefinition::new("errorEnd", ActivityType::EndEvent))
            .with_activity(ActivityDefinition::new("end", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "task"))
            .with_flow(FlowDefinition::new("f2", "task", "end"))
            .with_flow(FlowDefinition::new("f3", "catchError", "errorEnd"));

        let mut instance = build(definition, json!({}), tasks);
        instance.start().unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        assert!(instance.child_activity_by_id("errorEnd").unwrap().taken);
        assert!(!instance.child_activity_by_id("end").unwrap().taken);
        assert_eq!(instance.internal_listener_count(), 0);
    }

    #[test]
    fn test_exclusive_gateway_first_match_wins() {
        let definition = ProcessDefinition::new("choice", "Exclusive choice")
            .with_activity(ActivityDefinition::new("start", ActivityType::StartEvent))
            .with_activity(ActivityDefinition::new("decision", ActivityType::ExclusiveGateway))
            .with_activity(ActivityDefinition::new("low", ActivityType::EndEvent))
            .with_activity(ActivityDefinition::new("high", ActivityType::EndEvent))
            .with_flow(FlowDefinition::new("f1", "start", "decision"))
            .with_flow(
                FlowDefinition::new("toLow", "decision", "low")
                    .with_condition(ConditionExpression::jmespath("amount < `100`")),
            )
            .with_flow(
                FlowDefinition::new("toHigh", "decision", "high")
                    .with_condition(ConditionExpression::jmespath("amount >= `50`")),
            );

        // Both conditions hold; only the first declared flow is taken.
        let mut instance = build(definition, json!({"amount": 75}), TaskRegistry::new());
        instance.start().unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        assert!(instance.child_activity_by_id("low").unwrap().taken);
        assert!(!instance.child_activity_by_id("high").unwrap().taken);
    }

    #[test]
    fn test_no_lingering_listeners_after_end() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());
        instance.start().unwrap();
        instance.signal("userTask", DataPacket::null()).unwrap();

        assert_eq!(instance.state(), InstanceState::Completed);
        assert_eq!(instance.internal_listener_count(), 0);
        assert_eq!(instance.listener_count("boundTimer", ActivityEventKind::End), 0);
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Cancel),
            0
        );
        assert_eq!(
            instance.listener_count("boundTimer", ActivityEventKind::Leave),
            0
        );
    }

    #[test]
    fn test_external_listeners_observe_lifecycle() {
        let mut instance = build(boundary_process(true), json!({}), TaskRegistry::new());

        let waits = Arc::new(AtomicUsize::new(0));
        let waits_clone = waits.clone();
        instance.subscribe(
            "userTask",
            ActivityEventKind::Wait,
            Box::new(move |_| {
                waits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let late_hits = Arc::new(AtomicUsize::new(0));
        let late_hits_clone = late_hits.clone();

        instance.start().unwrap();
        assert_eq!(waits.load(Ordering::SeqCst), 1);

        // A listener registered after the fact sees nothing retroactively.
        instance.subscribe(
            "userTask",
            ActivityEventKind::Enter,
            Box::new(move |_| {
                late_hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejects_non_object_initial_variables() {
        let result = ProcessInstance::new(
            Arc::new(boundary_process(true)),
            DataPacket::new(json!(42)),
            Arc::new(JmesPathEvaluator),
            Arc::new(TaskRegistry::new()),
        );

        assert!(matches!(result, Err(EngineError::ValidationError(_))));
    }
}
