//! Domain layer: the activity execution state machine and token-routing core.
//!
//! Everything here is synchronous and deterministic; the application layer
//! wraps it in a serialized executor for async callers.

/// Activity lifecycle state machine
pub mod activity;
/// Boundary-event listener attachment protocol
pub mod boundary;
/// The process-wide signal bus
pub mod bus;
/// Flow condition expressions and evaluation
pub mod condition;
/// Process definition model and validation
pub mod definition;
/// Typed lifecycle events
pub mod events;
/// Sequence flow routing state
pub mod flow;
/// Join synchronization
pub mod join;
/// The process instance arena and transition driver
pub mod instance;
