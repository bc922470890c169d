use crate::domain::events::{ActivityEventKind, ProcessEvent};
use tracing::trace;

/// Identifier of one subscription on the signal bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Engine-internal reaction wired into the bus.
///
/// The boundary-event attachment protocol registers these against the
/// boundary event's own element scope; firing them is how a boundary event
/// reaches back into its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusAction {
    /// The boundary event completed. Interrupting events cancel the host.
    BoundaryFired {
        /// Arena index of the host activity
        host: usize,
        /// Arena index of the boundary event
        boundary: usize,
        /// Whether the boundary event interrupts its host
        interrupting: bool,
    },
    /// The boundary event was canceled as part of host cancellation and
    /// must route its own outbound (the cancellation path).
    BoundaryCanceled {
        /// Arena index of the host activity
        host: usize,
        /// Arena index of the boundary event
        boundary: usize,
    },
}

/// External listener callback.
pub type ExternalListener = Box<dyn Fn(&ProcessEvent) + Send>;

enum Subscriber {
    Internal(BusAction),
    External(ExternalListener),
}

struct Subscription {
    id: SubscriptionId,
    element_id: Option<String>,
    kind: Option<ActivityEventKind>,
    subscriber: Subscriber,
}

impl Subscription {
    fn matches(&self, event: &ProcessEvent) -> bool {
        if let Some(kind) = self.kind {
            if kind != event.kind {
                return false;
            }
        }
        match &self.element_id {
            Some(id) => event.scope.element_id() == Some(id.as_str()),
            // No element filter: instance-wide subscription, sees everything.
            None => true,
        }
    }
}

/// The process-wide publish/subscribe channel.
///
/// Subscriptions are keyed by (element id, event kind). Emission appends the
/// event to an outbox (drained by the executor in emission order) and invokes
/// matching subscribers from a snapshot taken before any callback runs, so a
/// listener registered while event X is being handled never observes X.
pub struct SignalBus {
    subscriptions: Vec<Subscription>,
    outbox: Vec<ProcessEvent>,
    next_id: u64,
}

impl SignalBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            outbox: Vec::new(),
            next_id: 0,
        }
    }

    fn allocate(&mut self) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Register an engine-internal reaction for (element, kind).
    pub(crate) fn subscribe_internal(
        &mut self,
        element_id: &str,
        kind: ActivityEventKind,
        action: BusAction,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.subscriptions.push(Subscription {
            id,
            element_id: Some(element_id.to_string()),
            kind: Some(kind),
            subscriber: Subscriber::Internal(action),
        });
        id
    }

    /// Register an external listener for (element, kind).
    pub fn subscribe(
        &mut self,
        element_id: &str,
        kind: ActivityEventKind,
        listener: ExternalListener,
    ) -> SubscriptionId {
        let id = self.allocate();
        self.subscriptions.push(Subscription {
            id,
            element_id: Some(element_id.to_string()),
            kind: Some(kind),
            subscriber: Subscriber::External(listener),
        });
        id
    }

    /// Register an external listener that sees every event of the instance.
    pub fn subscribe_all(&mut self, listener: ExternalListener) -> SubscriptionId {
        let id = self.allocate();
        self.subscriptions.push(Subscription {
            id,
            element_id: None,
            kind: None,
            subscriber: Subscriber::External(listener),
        });
        id
    }

    /// Remove a subscription. Removing an unknown or already-removed id is a
    /// no-op, which is what makes teardown idempotent.
    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscriptions.retain(|s| s.id != id);
    }

    /// Number of subscriptions (internal and external) for (element, kind).
    pub fn listener_count(&self, element_id: &str, kind: ActivityEventKind) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| s.element_id.as_deref() == Some(element_id) && s.kind == Some(kind))
            .count()
    }

    /// Number of engine-internal subscriptions still registered.
    ///
    /// Zero once an instance has ended; see the no-lingering-listeners
    /// property in the instance tests.
    pub fn internal_listener_count(&self) -> usize {
        self.subscriptions
            .iter()
            .filter(|s| matches!(s.subscriber, Subscriber::Internal(_)))
            .count()
    }

    /// Emit an event: record it in the outbox, notify external listeners and
    /// collect the internal reactions it triggers, in registration order.
    pub fn emit(&mut self, event: ProcessEvent) -> Vec<BusAction> {
        trace!(kind = %event.kind, scope = ?event.scope, "emit");

        // Snapshot before invoking anything: a subscription added while this
        // event is handled must not receive it.
        let snapshot: Vec<SubscriptionId> = self
            .subscriptions
            .iter()
            .filter(|s| s.matches(&event))
            .map(|s| s.id)
            .collect();

        let mut actions = Vec::new();
        for id in snapshot {
            // The subscription may have been removed by an earlier callback.
            let Some(subscription) = self.subscriptions.iter().find(|s| s.id == id) else {
                continue;
            };
            match &subscription.subscriber {
                Subscriber::Internal(action) => actions.push(*action),
                Subscriber::External(listener) => listener(&event),
            }
        }

        self.outbox.push(event);
        actions
    }

    /// Drain all events emitted since the last call, in emission order.
    pub fn take_events(&mut self) -> Vec<ProcessEvent> {
        std::mem::take(&mut self.outbox)
    }
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}
