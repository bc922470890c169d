use crate::application::executor::InstanceHandle;
use crate::domain::definition::{BoundaryTrigger, ProcessDefinition};
use crate::domain::events::ActivityEventKind;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;

/// Drives timer boundary events for one instance.
///
/// The engine core owns no clock; this service is the external timer
/// collaborator. It watches the instance's event stream, starts a timer when
/// a host with timer boundary events enters, fires the boundary event via
/// `trigger` when the delay elapses, and aborts the timer when the host
/// leaves first. Late fires are harmless: `trigger` ignores disarmed events.
pub struct BoundaryTimerService;

impl BoundaryTimerService {
    /// Attach timers for the definition's timer boundary events.
    ///
    /// Must be called before the instance starts so no `enter` is missed.
    /// Returns `None` when the definition declares no engine-driven timers.
    pub fn attach(definition: &ProcessDefinition, handle: &InstanceHandle) -> Option<JoinHandle<()>> {
        // host id -> [(boundary id, delay)]
        let mut timers: HashMap<String, Vec<(String, Duration)>> = HashMap::new();
        for activity in &definition.activities {
            if let Some(boundary) = &activity.boundary {
                if let BoundaryTrigger::Timer {
                    duration_ms: Some(ms),
                } = boundary.trigger
                {
                    timers
                        .entry(boundary.attached_to.0.clone())
                        .or_default()
                        .push((activity.id.0.clone(), Duration::from_millis(ms)));
                }
            }
        }
        if timers.is_empty() {
            return None;
        }

        let mut events = handle.events();
        let handle = handle.clone();
        Some(tokio::spawn(async move {
            let mut pending: HashMap<String, Vec<JoinHandle<()>>> = HashMap::new();
            loop {
                let event = match events.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "timer service lagged behind event stream");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };

                if event.is_instance_end() {
                    break;
                }
                let Some(element) = event.scope.element_id() else {
                    continue;
                };

                match event.kind {
                    ActivityEventKind::Enter => {
                        if let Some(boundaries) = timers.get(element) {
                            let mut handles = Vec::new();
                            for (boundary_id, delay) in boundaries.clone() {
                                let handle = handle.clone();
                                handles.push(tokio::spawn(async move {
                                    tokio::time::sleep(delay).await;
                                    let _ = handle.trigger(&boundary_id);
                                }));
                            }
                            abort_all(pending.insert(element.to_string(), handles));
                        }
                    }
                    ActivityEventKind::Leave | ActivityEventKind::Cancel => {
                        abort_all(pending.remove(element));
                    }
                    _ => {}
                }
            }

            for (_, handles) in pending.drain() {
                abort_all(Some(handles));
            }
        }))
    }
}

fn abort_all(handles: Option<Vec<JoinHandle<()>>>) {
    if let Some(handles) = handles {
        for handle in handles {
            handle.abort();
        }
    }
}
