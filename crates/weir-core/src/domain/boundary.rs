use crate::domain::bus::{BusAction, SignalBus, SubscriptionId};
use crate::domain::events::ActivityEventKind;

/// Listener attachment state of one boundary event.
///
/// Listener presence is modeled as an explicit armed flag plus the pair of
/// subscription ids, rather than duplicate-registration detection inside the
/// bus. Arming and disarming are the only transitions, and both are
/// idempotent: arming an armed event or disarming a disarmed one does
/// nothing. The attached listeners exist exactly during the host's active
/// window.
#[derive(Debug, Default)]
pub struct BoundaryState {
    armed: bool,
    end_subscription: Option<SubscriptionId>,
    cancel_subscription: Option<SubscriptionId>,
}

impl BoundaryState {
    /// Create a disarmed boundary state
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the listener pair is currently registered
    pub fn armed(&self) -> bool {
        self.armed
    }

    /// Register the listener pair on the boundary event's own scope.
    ///
    /// One `end` listener (fires the boundary routing, canceling the host
    /// when interrupting) and one `cancel` listener (routes the cancellation
    /// path when the host is canceled from outside). Returns false if the
    /// event was already armed.
    pub fn arm(
        &mut self,
        bus: &mut SignalBus,
        element_id: &str,
        host: usize,
        boundary: usize,
        interrupting: bool,
    ) -> bool {
        if self.armed {
            return false;
        }

        self.end_subscription = Some(bus.subscribe_internal(
            element_id,
            ActivityEventKind::End,
            BusAction::BoundaryFired {
                host,
                boundary,
                interrupting,
            },
        ));
        self.cancel_subscription = Some(bus.subscribe_internal(
            element_id,
            ActivityEventKind::Cancel,
            BusAction::BoundaryCanceled { host, boundary },
        ));
        self.armed = true;
        true
    }

    /// Remove the listener pair. Returns false if already disarmed.
    pub fn disarm(&mut self, bus: &mut SignalBus) -> bool {
        if !self.armed {
            return false;
        }

        if let Some(id) = self.end_subscription.take() {
            bus.unsubscribe(id);
        }
        if let Some(id) = self.cancel_subscription.take() {
            bus.unsubscribe(id);
        }
        self.armed = false;
        true
    }
}
