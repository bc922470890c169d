//! Application services: the serialized instance executor, the engine
//! facade, and the boundary timer collaborator.

/// Engine facade and registries
pub mod engine;
/// Per-instance serialized executor
pub mod executor;
/// Timer collaborator for timer boundary events
pub mod timers;
