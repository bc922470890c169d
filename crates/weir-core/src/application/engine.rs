use crate::application::executor::{spawn_instance, EventSink, InstanceHandle};
use crate::application::timers::BoundaryTimerService;
use crate::domain::condition::{ConditionEvaluator, JmesPathEvaluator};
use crate::domain::definition::ProcessDefinition;
use crate::domain::instance::ProcessInstance;
use crate::error::EngineError;
use crate::types::DataPacket;
use crate::{TaskBehavior, TaskRegistry};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// The engine facade: deploys process definitions and starts instances.
///
/// Definitions and task behaviors are held in in-memory registries; the
/// execution state itself lives inside each instance's executor task.
pub struct ProcessEngine {
    definitions: DashMap<String, Arc<ProcessDefinition>>,
    tasks: DashMap<String, TaskRegistry>,
    instances: DashMap<String, InstanceHandle>,
    evaluator: Arc<dyn ConditionEvaluator>,
}

impl ProcessEngine {
    /// Create an engine with the default JMESPath condition evaluator
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(JmesPathEvaluator))
    }

    /// Create an engine with a custom condition evaluator
    pub fn with_evaluator(evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        Self {
            definitions: DashMap::new(),
            tasks: DashMap::new(),
            instances: DashMap::new(),
            evaluator,
        }
    }

    /// Deploy a process definition.
    ///
    /// The definition is validated here; invalid definitions are rejected
    /// and can never start.
    pub fn deploy(&self, definition: ProcessDefinition) -> Result<(), EngineError> {
        definition.validate()?;
        info!(process = %definition.key.0, "deployed process definition");
        self.definitions
            .insert(definition.key.0.clone(), Arc::new(definition));
        Ok(())
    }

    /// Register the behavior executed by a task activity of a deployed
    /// process
    pub fn register_task<B>(&self, process: &str, activity: &str, behavior: B)
    where
        B: TaskBehavior + 'static,
    {
        self.tasks
            .entry(process.to_string())
            .or_default()
            .register(activity, behavior);
    }

    /// Build an instance and its executor without starting it.
    ///
    /// Event sinks observe the full lifecycle; subscribe to
    /// [`InstanceHandle::events`] before calling [`InstanceHandle::start`]
    /// for the same guarantee on the broadcast stream.
    pub fn create_instance(
        &self,
        process: &str,
        variables: DataPacket,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<InstanceHandle, EngineError> {
        let definition = self
            .definitions
            .get(process)
            .map(|d| d.clone())
            .ok_or_else(|| EngineError::DefinitionNotFound(process.to_string()))?;

        let tasks = self
            .tasks
            .get(process)
            .map(|t| t.clone())
            .unwrap_or_default();

        let instance = ProcessInstance::new(
            definition.clone(),
            variables,
            self.evaluator.clone(),
            Arc::new(tasks),
        )?;

        let handle = spawn_instance(instance, sinks);
        BoundaryTimerService::attach(&definition, &handle);
        self.instances
            .insert(handle.id().0.clone(), handle.clone());
        Ok(handle)
    }

    /// Create and start an instance of a deployed process
    pub fn start_instance(
        &self,
        process: &str,
        variables: DataPacket,
        sinks: Vec<Arc<dyn EventSink>>,
    ) -> Result<InstanceHandle, EngineError> {
        let handle = self.create_instance(process, variables, sinks)?;
        handle.start()?;
        Ok(handle)
    }

    /// Look up a running (or ended but still held) instance by id
    pub fn instance(&self, instance_id: &str) -> Option<InstanceHandle> {
        self.instances.get(instance_id).map(|h| h.clone())
    }

    /// Drop the handle for an ended instance
    pub fn remove_instance(&self, instance_id: &str) {
        self.instances.remove(instance_id);
    }
}

impl Default for ProcessEngine {
    fn default() -> Self {
        Self::new()
    }
}
