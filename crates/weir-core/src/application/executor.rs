use crate::domain::events::ProcessEvent;
use crate::domain::instance::{InstanceId, InstanceSnapshot, InstanceState, ProcessInstance};
use crate::error::EngineError;
use crate::types::DataPacket;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, warn};

/// Receives every event an instance emits, in emission order.
///
/// Sinks are registered before the instance starts, so they observe the
/// full lifecycle from the first `enter` onwards.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Handle one event
    async fn handle_event(&self, event: &ProcessEvent) -> Result<(), EngineError>;
}

/// An event sink that forwards into a tokio channel.
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProcessEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver it feeds
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ProcessEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Arc::new(Self { sender }), receiver)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn handle_event(&self, event: &ProcessEvent) -> Result<(), EngineError> {
        self.sender
            .send(event.clone())
            .map_err(|_| EngineError::ExecutorStopped("event receiver dropped".to_string()))
    }
}

enum InstanceCommand {
    Start,
    Signal { activity: String, data: DataPacket },
    Cancel { activity: String },
    Trigger { activity: String },
    Run { activity: String },
    Snapshot { reply: oneshot::Sender<InstanceSnapshot> },
}

/// Handle to a running instance executor.
///
/// All external stimuli are enqueued as messages to one serialized executor
/// task per instance, so every state transition runs to completion even
/// though callers live on arbitrary threads.
#[derive(Clone)]
pub struct InstanceHandle {
    id: InstanceId,
    commands: mpsc::UnboundedSender<InstanceCommand>,
    events: broadcast::Sender<ProcessEvent>,
    ended: watch::Receiver<bool>,
}

impl InstanceHandle {
    /// The instance id
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    fn send(&self, command: InstanceCommand) -> Result<(), EngineError> {
        self.commands
            .send(command)
            .map_err(|_| EngineError::ExecutorStopped(self.id.0.clone()))
    }

    /// Begin execution at the start events
    pub fn start(&self) -> Result<(), EngineError> {
        self.send(InstanceCommand::Start)
    }

    /// Resume a waiting activity with signal data
    pub fn signal(&self, activity: &str, data: DataPacket) -> Result<(), EngineError> {
        self.send(InstanceCommand::Signal {
            activity: activity.to_string(),
            data,
        })
    }

    /// Cancel an activity
    pub fn cancel(&self, activity: &str) -> Result<(), EngineError> {
        self.send(InstanceCommand::Cancel {
            activity: activity.to_string(),
        })
    }

    /// Fire an armed boundary event
    pub fn trigger(&self, activity: &str) -> Result<(), EngineError> {
        self.send(InstanceCommand::Trigger {
            activity: activity.to_string(),
        })
    }

    /// Run an activity directly (listener-side stimulus)
    pub fn run_activity(&self, activity: &str) -> Result<(), EngineError> {
        self.send(InstanceCommand::Run {
            activity: activity.to_string(),
        })
    }

    /// Snapshot the instance state
    pub async fn snapshot(&self) -> Result<InstanceSnapshot, EngineError> {
        let (reply, response) = oneshot::channel();
        self.send(InstanceCommand::Snapshot { reply })?;
        response
            .await
            .map_err(|_| EngineError::ExecutorStopped(self.id.0.clone()))
    }

    /// Subscribe to the live event stream.
    ///
    /// Best effort: events emitted before the subscription are not
    /// replayed. Register an [`EventSink`] at spawn time to observe the
    /// stream from the beginning.
    pub fn events(&self) -> broadcast::Receiver<ProcessEvent> {
        self.events.subscribe()
    }

    /// Wait until the instance has ended (completed or failed)
    pub async fn wait_ended(&self) -> Result<(), EngineError> {
        let mut ended = self.ended.clone();
        loop {
            if *ended.borrow_and_update() {
                return Ok(());
            }
            ended
                .changed()
                .await
                .map_err(|_| EngineError::ExecutorStopped(self.id.0.clone()))?;
        }
    }
}

/// Spawn the serialized executor task for an instance.
///
/// The instance does not begin until [`InstanceHandle::start`] is called,
/// which gives callers a window to subscribe to the event stream first.
/// After the instance ends the executor keeps serving snapshot queries
/// until every handle is dropped.
pub fn spawn_instance(
    mut instance: ProcessInstance,
    sinks: Vec<Arc<dyn EventSink>>,
) -> InstanceHandle {
    let id = instance.id().clone();
    let (commands, mut command_rx) = mpsc::unbounded_channel();
    let (events, _) = broadcast::channel(256);
    let (ended_tx, ended) = watch::channel(false);

    let broadcast_tx = events.clone();
    tokio::spawn(async move {
        while let Some(command) = command_rx.recv().await {
            match command {
                InstanceCommand::Start => {
                    if let Err(error) = instance.start() {
                        warn!(instance = %instance.id().0, %error, "start rejected");
                    }
                }
                InstanceCommand::Signal { activity, data } => {
                    if let Err(error) = instance.signal(&activity, data) {
                        debug!(instance = %instance.id().0, %error, "signal rejected");
                    }
                }
                InstanceCommand::Cancel { activity } => {
                    if let Err(error) = instance.cancel(&activity) {
                        debug!(instance = %instance.id().0, %error, "cancel rejected");
                    }
                }
                InstanceCommand::Trigger { activity } => {
                    if let Err(error) = instance.trigger(&activity) {
                        debug!(instance = %instance.id().0, %error, "trigger rejected");
                    }
                }
                InstanceCommand::Run { activity } => {
                    if let Err(error) = instance.run_activity(&activity) {
                        debug!(instance = %instance.id().0, %error, "run rejected");
                    }
                }
                InstanceCommand::Snapshot { reply } => {
                    let _ = reply.send(instance.snapshot());
                    continue;
                }
            }

            deliver_events(&mut instance, &broadcast_tx, &sinks).await;

            if matches!(
                instance.state(),
                InstanceState::Completed | InstanceState::Failed
            ) {
                let _ = ended_tx.send(true);
            }
        }
    });

    InstanceHandle {
        id,
        commands,
        events,
        ended,
    }
}

async fn deliver_events(
    instance: &mut ProcessInstance,
    broadcast_tx: &broadcast::Sender<ProcessEvent>,
    sinks: &[Arc<dyn EventSink>],
) {
    for event in instance.take_events() {
        // No live receiver is fine; broadcast is best effort.
        let _ = broadcast_tx.send(event.clone());
        for sink in sinks {
            if let Err(error) = sink.handle_event(&event).await {
                warn!(%error, "event sink failed");
            }
        }
    }
}
