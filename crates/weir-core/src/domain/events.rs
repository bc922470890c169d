use crate::domain::instance::InstanceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle events an element can emit.
///
/// These replace the dynamic `enter-<id>` style event names of classic
/// emitter-based engines with a typed kind scoped by element id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActivityEventKind {
    /// An inbound token reached the activity
    Enter,
    /// The activity began its unit of work
    Start,
    /// The activity suspended, waiting for an external signal
    Wait,
    /// The activity completed its unit of work
    End,
    /// The activity left the graph node (listeners torn down)
    Leave,
    /// The activity was canceled
    Cancel,
    /// A sequence flow was traversed (scoped by flow id)
    Taken,
    /// The activity's unit of work failed
    Error,
}

impl fmt::Display for ActivityEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActivityEventKind::Enter => "enter",
            ActivityEventKind::Start => "start",
            ActivityEventKind::Wait => "wait",
            ActivityEventKind::End => "end",
            ActivityEventKind::Leave => "leave",
            ActivityEventKind::Cancel => "cancel",
            ActivityEventKind::Taken => "taken",
            ActivityEventKind::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// What an event is about: a single element, or the instance as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventScope {
    /// A specific activity or flow, by element id
    Element(String),
    /// The whole process instance
    Instance,
}

impl EventScope {
    /// The element id, if this scope names one
    pub fn element_id(&self) -> Option<&str> {
        match self {
            EventScope::Element(id) => Some(id.as_str()),
            EventScope::Instance => None,
        }
    }
}

/// One event observed on the signal bus.
///
/// The process-wide completion event is `scope: Instance, kind: End`; every
/// other event is scoped to the element that emitted it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEvent {
    /// The instance this event belongs to
    pub instance_id: InstanceId,

    /// The element (or instance) the event is about
    pub scope: EventScope,

    /// The lifecycle transition that occurred
    pub kind: ActivityEventKind,

    /// Error message, present only on `Error` events
    pub message: Option<String>,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

impl ProcessEvent {
    /// Build an element-scoped event
    pub fn element(instance_id: InstanceId, id: &str, kind: ActivityEventKind) -> Self {
        Self {
            instance_id,
            scope: EventScope::Element(id.to_string()),
            kind,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Build the process-wide completion event
    pub fn instance_ended(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            scope: EventScope::Instance,
            kind: ActivityEventKind::End,
            message: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach an error message to the event
    pub fn with_message(mut self, message: String) -> Self {
        self.message = Some(message);
        self
    }

    /// True if this event is the process-wide completion event
    pub fn is_instance_end(&self) -> bool {
        self.scope == EventScope::Instance && self.kind == ActivityEventKind::End
    }

    /// True if this event is `kind` for the named element
    pub fn matches(&self, id: &str, kind: ActivityEventKind) -> bool {
        self.kind == kind && self.scope.element_id() == Some(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_instance_id() -> InstanceId {
        InstanceId("instance-1".to_string())
    }

    #[test]
    fn test_element_event() {
        let event = ProcessEvent::element(test_instance_id(), "task", ActivityEventKind::Enter);

        assert_eq!(event.scope, EventScope::Element("task".to_string()));
        assert_eq!(event.kind, ActivityEventKind::Enter);
        assert!(event.matches("task", ActivityEventKind::Enter));
        assert!(!event.matches("task", ActivityEventKind::End));
        assert!(!event.matches("other", ActivityEventKind::Enter));
        assert!(!event.is_instance_end());
    }

    #[test]
    fn test_instance_ended_event() {
        let event = ProcessEvent::instance_ended(test_instance_id());

        assert!(event.is_instance_end());
        assert_eq!(event.scope.element_id(), None);
    }

    #[test]
    fn test_event_kind_display() {
        assert_eq!(ActivityEventKind::Enter.to_string(), "enter");
        assert_eq!(ActivityEventKind::Wait.to_string(), "wait");
        assert_eq!(ActivityEventKind::Cancel.to_string(), "cancel");
        assert_eq!(ActivityEventKind::Taken.to_string(), "taken");
    }

    #[test]
    fn test_event_serialization() {
        let event = ProcessEvent::element(test_instance_id(), "task", ActivityEventKind::Wait);
        let serialized = serde_json::to_string(&event).unwrap();
        let deserialized: ProcessEvent = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized.kind, ActivityEventKind::Wait);
        assert_eq!(deserialized.scope, event.scope);
    }

    #[test]
    fn test_error_event_message() {
        let event = ProcessEvent::element(test_instance_id(), "task", ActivityEventKind::Error)
            .with_message("task failed".to_string());

        assert_eq!(event.message.as_deref(), Some("task failed"));
    }
}
