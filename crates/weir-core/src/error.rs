use thiserror::Error;

/// Core error type for the Weir engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// Process definition not found
    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    /// Process instance not found
    #[error("Process instance not found: {0}")]
    InstanceNotFound(String),

    /// Activity not found in the definition graph
    #[error("Activity not found: {0}")]
    ActivityNotFound(String),

    /// Definition validation error
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Activity execution error
    #[error("Activity execution error: {0}")]
    ActivityExecutionError(String),

    /// Instance execution error
    #[error("Instance execution error: {0}")]
    InstanceExecutionError(String),

    /// Condition evaluation error
    #[error("Condition evaluation error: {0}")]
    ConditionEvaluationError(String),

    /// Task behavior error
    #[error("Task error: {0}")]
    TaskError(String),

    /// Timer error
    #[error("Timer error: {0}")]
    TimerError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The instance executor is no longer running
    #[error("Instance executor stopped: {0}")]
    ExecutorStopped(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::SerializationError(err.to_string())
    }
}

impl From<String> for EngineError {
    fn from(err: String) -> Self {
        EngineError::Other(err)
    }
}

impl From<&str> for EngineError {
    fn from(err: &str) -> Self {
        EngineError::Other(err.to_string())
    }
}
