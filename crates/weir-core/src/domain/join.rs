use std::collections::HashMap;

/// How a token arrived at a join point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// A live token traversed the inbound flow
    Taken,
    /// The inbound flow was consumed by dead-path elimination
    Discarded,
}

/// Result of delivering one arrival to a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The synchronization condition is not yet met
    Waiting,
    /// All required inbound flows arrived and at least one carried a token;
    /// the join activates and its arrival set has been cleared
    Activate,
    /// All required inbound flows arrived but every one was discarded; the
    /// join forwards the discard instead of activating
    Discard,
}

/// Synchronization state for an activity with multiple inbound flows.
///
/// One arrival is counted per distinct inbound flow; re-arrivals on the same
/// flow before the set clears do not count twice, so a fast producer can
/// never satisfy the join alone. After activation the set clears and the
/// join re-arms for the next cycle.
#[derive(Debug)]
pub struct JoinState {
    required: usize,
    arrivals: HashMap<usize, Arrival>,
}

impl JoinState {
    /// Create a join requiring `required` distinct inbound arrivals
    pub fn new(required: usize) -> Self {
        Self {
            required,
            arrivals: HashMap::new(),
        }
    }

    /// The number of distinct inbound flows this join synchronizes
    pub fn required(&self) -> usize {
        self.required
    }

    /// Distinct flows that have arrived in the current cycle
    pub fn arrived(&self) -> usize {
        self.arrivals.len()
    }

    /// Deliver an arrival on `flow` (arena index of the inbound flow).
    pub fn arrive(&mut self, flow: usize, arrival: Arrival) -> JoinOutcome {
        // A taken token wins over an earlier discard on the same flow;
        // a duplicate taken arrival does not count twice.
        match self.arrivals.get(&flow) {
            Some(Arrival::Taken) => {}
            _ => {
                self.arrivals.insert(flow, arrival);
            }
        }

        if self.arrivals.len() < self.required {
            return JoinOutcome::Waiting;
        }

        let any_taken = self.arrivals.values().any(|a| *a == Arrival::Taken);
        self.arrivals.clear();
        if any_taken {
            JoinOutcome::Activate
        } else {
            JoinOutcome::Discard
        }
    }
}
