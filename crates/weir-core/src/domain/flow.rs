use crate::domain::definition::FlowDefinition;

/// Routing state of a sequence flow within one execution pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// No token has traversed or discarded the flow this pass
    Pending,
    /// A token traversed the flow
    Taken,
    /// Dead-path elimination consumed the flow without a token
    Discarded,
}

/// Runtime state of one sequence flow.
///
/// Topology is immutable and lives in the definition; only the per-pass
/// routing state is mutable. The state resets to `Pending` when the source
/// activity re-enters, which is what bounds discard propagation on loops.
#[derive(Debug)]
pub struct SequenceFlow {
    definition: FlowDefinition,
    state: FlowState,
}

impl SequenceFlow {
    /// Wrap a flow definition with fresh routing state
    pub fn new(definition: FlowDefinition) -> Self {
        Self {
            definition,
            state: FlowState::Pending,
        }
    }

    /// The flow's definition (id, endpoints, condition)
    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    /// The flow id as a string slice
    pub fn id(&self) -> &str {
        &self.definition.id.0
    }

    /// Current routing state
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// True if a token traversed the flow this pass
    pub fn taken(&self) -> bool {
        self.state == FlowState::Taken
    }

    /// Mark the flow taken. Returns false if the flow was already resolved
    /// this pass (taken is set exactly once per pass).
    pub fn take(&mut self) -> bool {
        if self.state != FlowState::Pending {
            return false;
        }
        self.state = FlowState::Taken;
        true
    }

    /// Mark the flow discarded. Returns false if already resolved, which
    /// terminates discard propagation around cycles.
    pub fn discard(&mut self) -> bool {
        if self.state != FlowState::Pending {
            return false;
        }
        self.state = FlowState::Discarded;
        true
    }

    /// Reset the routing state for a new pass (source re-entry)
    pub fn reset(&mut self) {
        self.state = FlowState::Pending;
    }
}
