// Firmware update check
//
// The update agent reports start/progress/end/error events on its own key.
// The update task polls for them at a short idle period and logs progress.

use tracing::{error, info, warn};
use zenoh::Session;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::Subscriber;
use zenoh::sample::Sample;

use crate::link::TransportError;
use crate::messages::{UpdateEvent, UpdateFailure, UpdateKind};

/// Source of firmware-update events
pub trait UpdateSource: Send {
    /// Next pending event, without waiting
    fn poll(&mut self) -> Option<UpdateEvent>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Idle,
    InProgress { kind: UpdateKind, percent: u32 },
    Done,
    Failed(UpdateFailure),
}

/// Percentage reported by the agent as `progress / (total / 100)`
pub fn progress_percent(done: u32, total: u32) -> u32 {
    let percent = if total >= 100 {
        done / (total / 100)
    } else {
        done.saturating_mul(100) / total.max(1)
    };
    percent.min(100)
}

/// Tracks the state of the current update from its events
pub struct UpdateMonitor {
    status: UpdateStatus,
}

impl Default for UpdateMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateMonitor {
    pub fn new() -> Self {
        Self {
            status: UpdateStatus::Idle,
        }
    }

    pub fn status(&self) -> UpdateStatus {
        self.status
    }

    pub fn handle(&mut self, event: UpdateEvent) {
        self.status = match (event, self.status) {
            (UpdateEvent::Start { kind }, _) => {
                info!("Starting {:?} update", kind);
                UpdateStatus::InProgress { kind, percent: 0 }
            }
            (UpdateEvent::Progress { done, total }, UpdateStatus::InProgress { kind, .. }) => {
                let percent = progress_percent(done, total);
                info!("Updating: {}%", percent);
                UpdateStatus::InProgress { kind, percent }
            }
            (UpdateEvent::Progress { .. }, status) => {
                warn!("Progress event with no update running");
                status
            }
            (UpdateEvent::End, _) => {
                info!("Update finished");
                UpdateStatus::Done
            }
            (UpdateEvent::Error { failure }, _) => {
                error!("Update failed: {}", describe(failure));
                UpdateStatus::Failed(failure)
            }
        };
    }
}

fn describe(failure: UpdateFailure) -> &'static str {
    match failure {
        UpdateFailure::Auth => "authentication error",
        UpdateFailure::Begin => "could not begin update",
        UpdateFailure::Connect => "connection error",
        UpdateFailure::Receive => "receive error",
        UpdateFailure::End => "could not finish update",
    }
}

/// Update events delivered as JSON on a zenoh key
pub struct ZenohUpdateSource {
    _session: Session,
    subscriber: Subscriber<FifoChannelHandler<Sample>>,
}

impl ZenohUpdateSource {
    pub async fn open(config: zenoh::Config, key: &str) -> Result<Self, TransportError> {
        let session = zenoh::open(config)
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;
        let subscriber = session
            .declare_subscriber(key.to_string())
            .await
            .map_err(|e| TransportError::Declare {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        info!("Listening for updates on: {}", key);
        Ok(Self {
            _session: session,
            subscriber,
        })
    }
}

impl UpdateSource for ZenohUpdateSource {
    fn poll(&mut self) -> Option<UpdateEvent> {
        while let Ok(Some(sample)) = self.subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<UpdateEvent>(&payload) {
                Ok(event) => return Some(event),
                Err(e) => warn!("Failed to parse update event: {}", e),
            }
        }
        None
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 1000), 0);
        assert_eq!(progress_percent(500, 1000), 50);
        assert_eq!(progress_percent(1000, 1000), 100);
        assert_eq!(progress_percent(5, 10), 50);
        assert_eq!(progress_percent(3, 0), 100);
    }

    #[test]
    fn test_monitor_tracks_update_lifecycle() {
        let mut monitor = UpdateMonitor::new();
        assert_eq!(monitor.status(), UpdateStatus::Idle);

        // Stray progress before start is ignored
        monitor.handle(UpdateEvent::Progress { done: 1, total: 2 });
        assert_eq!(monitor.status(), UpdateStatus::Idle);

        monitor.handle(UpdateEvent::Start {
            kind: UpdateKind::Firmware,
        });
        monitor.handle(UpdateEvent::Progress {
            done: 300,
            total: 1200,
        });
        assert_eq!(
            monitor.status(),
            UpdateStatus::InProgress {
                kind: UpdateKind::Firmware,
                percent: 25
            }
        );

        monitor.handle(UpdateEvent::End);
        assert_eq!(monitor.status(), UpdateStatus::Done);

        monitor.handle(UpdateEvent::Error {
            failure: UpdateFailure::Auth,
        });
        assert_eq!(monitor.status(), UpdateStatus::Failed(UpdateFailure::Auth));
    }
}
