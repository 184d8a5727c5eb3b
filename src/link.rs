// Transport link: zenoh session plus explicit connectivity state
//
// The dispatch task owns a `Link`. When the transport drops, the link walks
// Disconnected -> Reconnecting{attempt} -> Connected, sleeping a bounded,
// doubling backoff between attempts and retrying forever. While it does,
// nothing is published and no commands are read.

use std::time::Duration;

use tracing::{debug, info, warn};
use zenoh::Session;
use zenoh::handlers::FifoChannelHandler;
use zenoh::pubsub::{Publisher, Subscriber};
use zenoh::sample::Sample;

use crate::config::{RECONNECT_BASE, RECONNECT_CAP};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("failed to open session: {0}")]
    Open(String),

    #[error("failed to declare {key}: {reason}")]
    Declare { key: String, reason: String },

    #[error("failed to publish: {0}")]
    Publish(String),

    #[error("not connected")]
    NotConnected,
}

/// Publish/subscribe transport collaborator
pub trait Transport: Send {
    /// (Re)open the session and subscribe to the command key
    fn connect(&mut self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Drop the session
    fn disconnect(&mut self) -> impl Future<Output = ()> + Send;

    fn is_connected(&self) -> bool;

    /// Next pending inbound command, without waiting
    fn try_recv(&mut self) -> Option<Vec<u8>>;

    /// Publish one telemetry payload
    fn publish(&mut self, payload: String) -> impl Future<Output = Result<(), TransportError>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
}

/// Doubling backoff, capped
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: RECONNECT_BASE,
            cap: RECONNECT_CAP,
        }
    }
}

impl ReconnectPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << shift).min(self.cap)
    }
}

pub struct Link<T: Transport> {
    transport: T,
    state: LinkState,
    policy: ReconnectPolicy,
    failed_attempts: u64,
}

impl<T: Transport> Link<T> {
    pub fn new(transport: T, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            state: LinkState::Disconnected,
            policy,
            failed_attempts: 0,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Total failed connect attempts since start
    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts
    }

    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected && self.transport.is_connected()
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("Link {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Keep trying to connect until it works. Blocks the caller meanwhile.
    pub async fn reconnect(&mut self) {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.set_state(LinkState::Reconnecting { attempt });
            info!("Attempting transport connection (attempt {})...", attempt);

            match self.transport.connect().await {
                Ok(()) => {
                    info!("Transport connected");
                    self.set_state(LinkState::Connected);
                    return;
                }
                Err(e) => {
                    self.failed_attempts += 1;
                    let delay = self.policy.delay(attempt);
                    warn!("Connect failed: {}, retrying in {}ms", e, delay.as_millis());
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    async fn mark_disconnected(&mut self) {
        self.transport.disconnect().await;
        self.set_state(LinkState::Disconnected);
    }

    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        if self.state != LinkState::Connected {
            return None;
        }
        self.transport.try_recv()
    }

    /// Publish, or mark the link down so the next cycle reconnects
    pub async fn publish(&mut self, payload: String) -> Result<(), TransportError> {
        if !self.is_connected() {
            warn!("Transport not connected, will reconnect");
            self.mark_disconnected().await;
            return Err(TransportError::NotConnected);
        }
        match self.transport.publish(payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("Failed to publish data: {}", e);
                self.mark_disconnected().await;
                Err(e)
            }
        }
    }
}

/// Zenoh-backed transport: one subscriber on the command key, one publisher
/// on the telemetry key
pub struct ZenohTransport {
    config: zenoh::Config,
    cmd_key: String,
    telemetry_key: String,
    session: Option<Session>,
    subscriber: Option<Subscriber<FifoChannelHandler<Sample>>>,
    publisher: Option<Publisher<'static>>,
}

impl ZenohTransport {
    pub fn new(config: zenoh::Config, cmd_key: &str, telemetry_key: &str) -> Self {
        Self {
            config,
            cmd_key: cmd_key.to_string(),
            telemetry_key: telemetry_key.to_string(),
            session: None,
            subscriber: None,
            publisher: None,
        }
    }
}

impl Transport for ZenohTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.disconnect().await;

        info!("Opening Zenoh session...");
        let session = zenoh::open(self.config.clone())
            .await
            .map_err(|e| TransportError::Open(e.to_string()))?;

        let subscriber = session
            .declare_subscriber(self.cmd_key.clone())
            .await
            .map_err(|e| TransportError::Declare {
                key: self.cmd_key.clone(),
                reason: e.to_string(),
            })?;
        let publisher = session
            .declare_publisher(self.telemetry_key.clone())
            .await
            .map_err(|e| TransportError::Declare {
                key: self.telemetry_key.clone(),
                reason: e.to_string(),
            })?;

        info!("Subscribed to: {}", self.cmd_key);
        info!("Publishing to: {}", self.telemetry_key);

        self.session = Some(session);
        self.subscriber = Some(subscriber);
        self.publisher = Some(publisher);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.publisher = None;
        self.subscriber = None;
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                debug!("Error closing session: {}", e);
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        let subscriber = self.subscriber.as_ref()?;
        match subscriber.try_recv() {
            Ok(Some(sample)) => Some(sample.payload().to_bytes().into_owned()),
            Ok(None) => None,
            Err(e) => {
                warn!("Command subscriber failed: {}", e);
                None
            }
        }
    }

    async fn publish(&mut self, payload: String) -> Result<(), TransportError> {
        let publisher = self.publisher.as_ref().ok_or(TransportError::NotConnected)?;
        publisher
            .put(payload)
            .await
            .map_err(|e| TransportError::Publish(e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Default)]
    pub struct MockState {
        pub connected: bool,
        pub fail_connects: u32,
        pub connects: u32,
        pub inbound: VecDeque<Vec<u8>>,
        pub published: Vec<String>,
        pub fail_publish: bool,
    }

    /// In-memory transport; the shared state lets tests script and inspect it
    #[derive(Clone, Default)]
    pub struct MockTransport {
        pub state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn push_command(&self, raw: &str) {
            self.state.lock().unwrap().inbound.push_back(raw.as_bytes().to_vec());
        }

        pub fn published(&self) -> Vec<String> {
            self.state.lock().unwrap().published.clone()
        }
    }

    impl Transport for MockTransport {
        async fn connect(&mut self) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            state.connects += 1;
            if state.fail_connects > 0 {
                state.fail_connects -= 1;
                return Err(TransportError::Open("refused".into()));
            }
            state.connected = true;
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.state.lock().unwrap().connected = false;
        }

        fn is_connected(&self) -> bool {
            self.state.lock().unwrap().connected
        }

        fn try_recv(&mut self) -> Option<Vec<u8>> {
            self.state.lock().unwrap().inbound.pop_front()
        }

        async fn publish(&mut self, payload: String) -> Result<(), TransportError> {
            let mut state = self.state.lock().unwrap();
            if state.fail_publish {
                return Err(TransportError::Publish("broken pipe".into()));
            }
            state.published.push(payload);
            Ok(())
        }
    }
}
