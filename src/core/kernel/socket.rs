use crate::core::clock::{Clock, SystemClock};
use crate::core::errors::ExchangeError;
use crate::core::kernel::backoff::Backoff;
use crate::core::kernel::codec::WsCodec;
use crate::core::kernel::registry::{SubscriptionDescriptor, SubscriptionKey, SubscriptionRegistry};
use crate::core::kernel::ws::{WsConfig, WsSession};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Lifecycle of a socket session. Only the session worker moves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closing,
    Closed,
}

#[derive(Debug)]
enum Command {
    Subscribe(SubscriptionDescriptor),
    Unsubscribe(SubscriptionDescriptor),
    /// Unsubscribe then subscribe again, so the venue sends a fresh snapshot
    Resubscribe(SubscriptionKey),
}

enum LoopExit {
    Cancelled,
    Lost(String),
}

/// Assembles a [`SocketSession`] around a codec and a transport.
pub struct SocketSessionBuilder<C: WsCodec> {
    name: String,
    codec: Arc<C>,
    registry: Arc<SubscriptionRegistry>,
    config: WsConfig,
    clock: Arc<dyn Clock>,
}

impl<C: WsCodec> SocketSessionBuilder<C> {
    pub fn new(name: impl Into<String>, codec: C) -> Self {
        Self {
            name: name.into(),
            codec: Arc::new(codec),
            registry: Arc::new(SubscriptionRegistry::new()),
            config: WsConfig::default(),
            clock: Arc::new(SystemClock),
        }
    }

    /// Share an existing registry instead of starting empty
    pub fn with_registry(mut self, registry: Arc<SubscriptionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_config(mut self, config: WsConfig) -> Self {
        self.config = config;
        self
    }

    /// Clock used for login timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Spawn the session worker on the current tokio runtime.
    ///
    /// Returns the session handle and the receiving end of the inbound
    /// frame channel. Frames arrive in transport order; heartbeat replies
    /// are filtered out.
    pub fn start<T: WsSession>(self, transport: T) -> (SocketSession, mpsc::Receiver<Message>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let cancel = CancellationToken::new();

        let worker = Worker {
            name: self.name.clone(),
            codec: self.codec,
            transport,
            registry: Arc::clone(&self.registry),
            clock: self.clock,
            backoff: Backoff::from_policy(self.config.backoff.clone()),
            config: self.config,
            commands: command_rx,
            frames: frame_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };

        let span = info_span!("socket_session", session = %self.name);
        let handle = tokio::spawn(worker.run().instrument(span));

        let session = SocketSession {
            name: self.name,
            registry: self.registry,
            commands: command_tx,
            state: state_rx,
            cancel,
            worker: Mutex::new(Some(handle)),
        };

        (session, frame_rx)
    }
}

/// Handle to one logical streaming connection.
///
/// The registry, not the socket, holds the desired subscriptions: every
/// (re)connect replays it. Dropping the handle stops the worker.
pub struct SocketSession {
    name: String,
    registry: Arc<SubscriptionRegistry>,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSession")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("subscriptions", &self.registry.len())
            .finish()
    }
}

impl SocketSession {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Record a subscription and send it now if the socket is up.
    ///
    /// When the socket is down the next replay sends it. Confirmation
    /// arrives later as an inbound control frame.
    pub fn subscribe(&self, descriptor: SubscriptionDescriptor) -> Result<(), ExchangeError> {
        if self.cancel.is_cancelled() {
            return Err(ExchangeError::SessionClosed);
        }

        self.registry.add(descriptor.clone());

        // The worker publishes Connected before it snapshots the registry,
        // so a descriptor added here is either replayed or sent below.
        if self.state() == ConnectionState::Connected {
            self.commands
                .send(Command::Subscribe(descriptor))
                .map_err(|_| ExchangeError::SessionClosed)?;
        }
        Ok(())
    }

    /// Forget a subscription and tell the venue if the socket is up.
    /// Returns whether it was registered.
    pub fn unsubscribe(&self, key: &SubscriptionKey) -> Result<bool, ExchangeError> {
        if self.cancel.is_cancelled() {
            return Err(ExchangeError::SessionClosed);
        }

        let Some(descriptor) = self.registry.remove(key) else {
            return Ok(false);
        };

        if self.state() == ConnectionState::Connected {
            self.commands
                .send(Command::Unsubscribe(descriptor))
                .map_err(|_| ExchangeError::SessionClosed)?;
        }
        Ok(true)
    }

    /// Ask the venue to restart a subscription: an unsubscribe followed by
    /// a subscribe on the live connection. Channels that open with a
    /// snapshot send a new one, which is how a book recovers from a gap.
    ///
    /// Returns `false` when the subscription is not registered. While
    /// disconnected nothing is sent; the next replay has the same effect.
    pub fn resubscribe(&self, key: &SubscriptionKey) -> Result<bool, ExchangeError> {
        if self.cancel.is_cancelled() {
            return Err(ExchangeError::SessionClosed);
        }
        if !self.registry.contains(key) {
            return Ok(false);
        }

        if self.state() == ConnectionState::Connected {
            self.commands
                .send(Command::Resubscribe(key.clone()))
                .map_err(|_| ExchangeError::SessionClosed)?;
        }
        Ok(true)
    }

    /// Wait until the session reports `Connected`
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ExchangeError> {
        let mut state = self.state.clone();
        let reached = tokio::time::timeout(timeout, async move {
            state
                .wait_for(|s| matches!(s, ConnectionState::Connected | ConnectionState::Closed))
                .await
                .map(|s| *s)
        })
        .await;

        match reached {
            Err(_) => Err(ExchangeError::ConnectionTimeout(format!(
                "{} not connected after {:?}",
                self.name, timeout
            ))),
            Ok(Ok(ConnectionState::Connected)) => Ok(()),
            Ok(_) => Err(ExchangeError::SessionClosed),
        }
    }

    /// Stop the worker and close the transport. Terminal.
    pub async fn close(&self) -> Result<(), ExchangeError> {
        self.cancel.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            handle.await.map_err(|e| {
                ExchangeError::NetworkError(format!("{} worker failed: {}", self.name, e))
            })?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SocketSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Sole owner of the transport and of state transitions.
struct Worker<C: WsCodec, T: WsSession> {
    name: String,
    codec: Arc<C>,
    transport: T,
    registry: Arc<SubscriptionRegistry>,
    config: WsConfig,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    commands: mpsc::UnboundedReceiver<Command>,
    frames: mpsc::Sender<Message>,
    state: watch::Sender<ConnectionState>,
    cancel: CancellationToken,
}

impl<C: WsCodec, T: WsSession> Worker<C, T> {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(?previous, ?next, "Connection state changed");
        }
    }

    async fn run(mut self) {
        let cancel = self.cancel.clone();
        let mut attempt_state = ConnectionState::Connecting;

        loop {
            self.set_state(attempt_state);
            attempt_state = ConnectionState::Reconnecting;

            let established = tokio::select! {
                () = cancel.cancelled() => break,
                result = self.establish() => result,
            };

            match established {
                Ok(replayed) => {
                    info!(replayed, "Connected");
                    self.backoff.reset();
                    match self.read_loop().await {
                        LoopExit::Cancelled => break,
                        LoopExit::Lost(reason) => warn!(%reason, "Connection lost"),
                    }
                }
                Err(e) => warn!(error = %e, attempt = self.backoff.attempts() + 1, "Connect failed"),
            }

            if cancel.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Reconnecting);
            let _ = self.transport.close().await;

            let delay = self.backoff.next_delay();
            debug!(?delay, "Waiting before reconnect");
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Closing);
        if let Err(e) = self.transport.close().await {
            debug!(error = %e, "Error while closing transport");
        }
        self.set_state(ConnectionState::Closed);
        info!("Session closed");
    }

    /// Connect, log in if the codec asks for it, then replay the registry.
    async fn establish(&mut self) -> Result<usize, ExchangeError> {
        self.transport.connect().await?;
        self.login().await?;

        self.set_state(ConnectionState::Connected);

        let snapshot = self.registry.all();
        let mut replayed = 0;
        for descriptor in &snapshot {
            let frame = match self
                .codec
                .encode_subscription(std::slice::from_ref(descriptor))
            {
                Ok(frame) => frame,
                Err(e) => {
                    error!(subscription = %descriptor.identity(), error = %e, "Cannot encode subscription");
                    continue;
                }
            };
            self.transport.send_raw(frame).await?;
            replayed += 1;
        }

        Ok(replayed)
    }

    async fn login(&mut self) -> Result<(), ExchangeError> {
        let Some(frame) = self.codec.encode_login(self.clock.now_ms())? else {
            return Ok(());
        };

        self.transport.send_raw(frame).await?;
        let deadline = tokio::time::Instant::now() + self.config.login_timeout;

        loop {
            let next = tokio::time::timeout_at(deadline, self.transport.next_raw())
                .await
                .map_err(|_| ExchangeError::AuthError("Login timed out".to_string()))?;

            match next {
                Some(Ok(message)) => match self.codec.login_result(&message) {
                    Some(Ok(())) => {
                        debug!("Logged in");
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        if !self.codec.is_heartbeat_reply(&message) {
                            Self::forward(&self.frames, &self.cancel, message).await;
                        }
                    }
                },
                Some(Err(e)) => return Err(e),
                None => {
                    return Err(ExchangeError::NetworkError(
                        "Connection closed during login".to_string(),
                    ))
                }
            }
        }
    }

    async fn read_loop(&mut self) -> LoopExit {
        let cancel = self.cancel.clone();
        let keepalive = self.config.keepalive_timeout;
        let mut awaiting_reply = false;

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => return LoopExit::Cancelled,

                command = self.commands.recv() => {
                    let Some(command) = command else {
                        // Every handle is gone
                        cancel.cancel();
                        return LoopExit::Cancelled;
                    };
                    if let Err(e) = self.execute(command).await {
                        return LoopExit::Lost(e.to_string());
                    }
                }

                next = tokio::time::timeout(keepalive, self.transport.next_raw()) => match next {
                    Err(_) if awaiting_reply => {
                        return LoopExit::Lost("no heartbeat reply".to_string());
                    }
                    Err(_) => {
                        awaiting_reply = true;
                        debug!("Connection idle, sending heartbeat");
                        if let Err(e) = self.transport.send_raw(self.codec.heartbeat()).await {
                            return LoopExit::Lost(e.to_string());
                        }
                    }
                    Ok(Some(Ok(Message::Close(frame)))) => {
                        return LoopExit::Lost(format!("closed by peer: {:?}", frame));
                    }
                    Ok(Some(Ok(message))) => {
                        awaiting_reply = false;
                        if !self.codec.is_heartbeat_reply(&message) {
                            Self::forward(&self.frames, &self.cancel, message).await;
                        }
                    }
                    Ok(Some(Err(e))) => return LoopExit::Lost(e.to_string()),
                    Ok(None) => return LoopExit::Lost("stream ended".to_string()),
                },
            }
        }
    }

    /// Send one queued command.
    ///
    /// Commands can outlive the connection they were queued for, so the
    /// registry decides: a subscribe whose identity was removed meanwhile
    /// is skipped, and so is an unsubscribe whose identity was added back.
    async fn execute(&mut self, command: Command) -> Result<(), ExchangeError> {
        let frames = match command {
            Command::Subscribe(descriptor) => {
                let Some(current) = self.registry.get(&descriptor.identity()) else {
                    debug!(subscription = %descriptor.identity(), "Skipping subscribe for removed subscription");
                    return Ok(());
                };
                vec![self.codec.encode_subscription(std::slice::from_ref(&current))]
            }
            Command::Unsubscribe(descriptor) => {
                if self.registry.contains(&descriptor.identity()) {
                    debug!(subscription = %descriptor.identity(), "Skipping unsubscribe for re-added subscription");
                    return Ok(());
                }
                vec![self.codec.encode_unsubscription(std::slice::from_ref(&descriptor))]
            }
            Command::Resubscribe(key) => {
                let Some(current) = self.registry.get(&key) else {
                    debug!(subscription = %key, "Skipping resubscribe for removed subscription");
                    return Ok(());
                };
                info!(subscription = %key, "Resubscribing");
                let subscriptions = std::slice::from_ref(&current);
                vec![
                    self.codec.encode_unsubscription(subscriptions),
                    self.codec.encode_subscription(subscriptions),
                ]
            }
        };

        for frame in frames {
            match frame {
                Ok(frame) => self.transport.send_raw(frame).await?,
                Err(e) => {
                    error!(error = %e, "Cannot encode request");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Hand a frame to the consumer; waits when the channel is full.
    async fn forward(frames: &mpsc::Sender<Message>, cancel: &CancellationToken, message: Message) {
        tokio::select! {
            () = cancel.cancelled() => {}
            sent = frames.send(message) => {
                if sent.is_err() {
                    debug!("Frame receiver dropped");
                }
            }
        }
    }
}
