//!
//! Weir Core - a BPMN-style process execution engine
//!
//! This crate interprets a parsed process definition (a graph of activities
//! connected by directional flows) and drives a running instance of that
//! graph to completion, emitting lifecycle events and accepting external
//! signals and cancellations at well-defined suspension points.
//!
//! The domain layer holds the activity state machine, boundary-event
//! attachment protocol, join synchronization and token routing; the
//! application layer wraps each instance in one serialized executor task
//! and provides the engine facade. Parsing process models into
//! [`ProcessDefinition`] values and persisting execution state are external
//! concerns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;

/// Domain layer - the execution state machine and token routing core
pub mod domain;

/// Application services - executor, facade, timers
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

// Re-export key types
pub use error::EngineError;
pub use types::{DataPacket, LogLevel, Variables};

pub use domain::condition::{ConditionEvaluator, ConditionExpression, JmesPathEvaluator};
pub use domain::definition::{
    ActivityDefinition, ActivityId, ActivityType, BoundaryDefinition, BoundaryTrigger,
    FlowDefinition, FlowId, OutboundPolicy, ProcessDefinition, ProcessKey,
};
pub use domain::events::{ActivityEventKind, EventScope, ProcessEvent};
pub use domain::instance::{
    ActivitySnapshot, BoundarySnapshot, FlowSnapshot, InstanceId, InstanceSnapshot, InstanceState,
    ProcessInstance,
};

pub use application::engine::ProcessEngine;
pub use application::executor::{ChannelSink, EventSink, InstanceHandle};
pub use application::timers::BoundaryTimerService;

/// The unit of work behind an automatic task activity.
///
/// Behaviors run synchronously inside the instance's transition, mutating
/// the variable scope; a returned error becomes a typed failure event on
/// the activity.
pub trait TaskBehavior: Send + Sync {
    /// Execute the task against the instance variables
    fn execute(&self, variables: &mut Variables) -> Result<(), EngineError>;
}

impl<F> TaskBehavior for F
where
    F: Fn(&mut Variables) -> Result<(), EngineError> + Send + Sync,
{
    fn execute(&self, variables: &mut Variables) -> Result<(), EngineError> {
        self(variables)
    }
}

/// Registry of task behaviors, keyed by activity id.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    behaviors: HashMap<String, Arc<dyn TaskBehavior>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the behavior for an activity id
    pub fn register<B>(&mut self, activity_id: &str, behavior: B)
    where
        B: TaskBehavior + 'static,
    {
        self.behaviors
            .insert(activity_id.to_string(), Arc::new(behavior));
    }

    /// Look up the behavior for an activity id
    pub fn get(&self, activity_id: &str) -> Option<Arc<dyn TaskBehavior>> {
        self.behaviors.get(activity_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registry_roundtrip() {
        let mut registry = TaskRegistry::new();
        registry.register("score", |variables: &mut Variables| {
            variables.set("score", json!(42));
            Ok(())
        });

        let mut variables = Variables::new();
        registry
            .get("score")
            .unwrap()
            .execute(&mut variables)
            .unwrap();

        assert_eq!(variables.get("score"), Some(&json!(42)));
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_behavior_error_propagates() {
        let mut registry = TaskRegistry::new();
        registry.register("boom", |_: &mut Variables| {
            Err(EngineError::TaskError("exploded".to_string()))
        });

        let mut variables = Variables::new();
        let result = registry.get("boom").unwrap().execute(&mut variables);

        assert!(matches!(result, Err(EngineError::TaskError(_))));
    }

    #[test]
    fn test_registry_clone_shares_behaviors() {
        let mut registry = TaskRegistry::new();
        registry.register("noop", |_: &mut Variables| Ok(()));

        let cloned = registry.clone();
        assert!(cloned.get("noop").is_some());
    }
}
