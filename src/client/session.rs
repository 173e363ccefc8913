// ABOUTME: STOMP connection manager owning the handshake, subscriptions and frame dispatch
// ABOUTME: Runs as a single-task event loop so no session state ever needs a lock

use crate::client::config::ConnectionConfig;
use crate::client::error::{StompError, StompResult};
use crate::client::subscription::{
    AckMode, CallbackId, CallbackTable, MessageCallback, SubscribeOptions, Subscription,
};
use crate::frame::{Command, Frame, FrameBuilder};
use crate::protocol::{self, Version};
use crate::receiver::{read_frame_sync, Receiver, ReceiverEvent, ReceiverHandle};
use crate::transport::{Transport, WriteTransport};
use flate2::read::GzDecoder;
use std::collections::HashMap;
use std::io::{self, Read};
use tokio::sync::{mpsc, oneshot};

/// Notifications delivered to the connection's owner.
///
/// `Message` events only flow in send-to-caller mode; otherwise messages go
/// to the registered callbacks. `Dropped` is final: the receiver has stopped
/// and the owner should reconnect (with backoff) if it wants the stream
/// back.
#[derive(Debug)]
pub enum StompEvent {
    Message { destination: String, frame: Frame },
    Receipt(Frame),
    ServerError(Frame),
    Dropped(StompError),
}

enum SessionCommand {
    Subscribe {
        destination: String,
        headers: Vec<(String, String)>,
        options: SubscribeOptions,
        reply: oneshot::Sender<StompResult<()>>,
    },
    Unsubscribe {
        destination: String,
        reply: oneshot::Sender<StompResult<()>>,
    },
    Send {
        destination: String,
        body: Vec<u8>,
        reply: oneshot::Sender<StompResult<()>>,
    },
    Ack {
        frame: Frame,
        reply: oneshot::Sender<StompResult<()>>,
    },
    Nack {
        frame: Frame,
        reply: oneshot::Sender<StompResult<()>>,
    },
    RegisterCallback {
        destination: String,
        callback: MessageCallback,
        reply: oneshot::Sender<CallbackId>,
    },
    RemoveCallback {
        destination: String,
        id: CallbackId,
        reply: oneshot::Sender<()>,
    },
    SetSendToCaller {
        enabled: bool,
        reply: oneshot::Sender<()>,
    },
    Disconnect {
        reply: oneshot::Sender<StompResult<()>>,
    },
}

/// Handle to an established STOMP session.
///
/// Cheap operations are messages to the session task; replies come back on
/// oneshot channels, so callers observe operations in the order they issued
/// them. Dropping the handle tears the session down.
///
/// ```no_run
/// use stomp::{ConnectionConfig, StompClient, SubscribeOptions};
///
/// #[tokio::main]
/// async fn main() -> stomp::StompResult<()> {
///     let mut client = StompClient::connect(
///         ConnectionConfig::new("localhost").with_credentials("guest", "guest"),
///     )
///     .await?;
///
///     client
///         .register_callback("/queue/orders", |frame| {
///             println!("{} bytes", frame.body.len());
///         })
///         .await?;
///     client
///         .subscribe("/queue/orders", Vec::new(), SubscribeOptions::default())
///         .await?;
///
///     client.send("/queue/orders", "hello").await?;
///     client.disconnect().await?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct StompClient {
    commands: mpsc::UnboundedSender<SessionCommand>,
    events: mpsc::UnboundedReceiver<StompEvent>,
    version: Version,
}

impl StompClient {
    /// Connects to the broker, performs the CONNECT/CONNECTED handshake and
    /// starts the session and receiver tasks. The whole routine runs under
    /// the config's connect timeout.
    pub async fn connect(config: ConnectionConfig) -> StompResult<StompClient> {
        match tokio::time::timeout(config.timeout, StompClient::establish(config)).await {
            Ok(result) => result,
            Err(_) => Err(StompError::Timeout),
        }
    }

    async fn establish(config: ConnectionConfig) -> StompResult<StompClient> {
        let mut transport = Transport::connect(&config).await?;

        let requested = config.requested_version();
        let connect = FrameBuilder::connect(requested)
            .header("accept-version", config.accept_version_header())
            .header("host", config.host.as_str())
            .optional_header("login", config.login.as_deref())
            .optional_header("passcode", config.passcode.as_deref())
            .headers(config.headers.iter().cloned())
            .build();
        transport.send(&connect.to_bytes()).await?;

        let reply = read_frame_sync(&mut transport, requested).await?;
        let version = match reply.command {
            // Absence of a version header means a 1.0 broker.
            Command::Connected => reply.version().unwrap_or(Version::V1_0),
            Command::Error => {
                let message = reply
                    .header("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| "connection refused".to_string());
                return Err(StompError::ServerRejected(message));
            }
            other => {
                return Err(StompError::ServerRejected(format!(
                    "unexpected {other} frame during handshake"
                )));
            }
        };
        tracing::info!(host = %config.host, %version, "connected");

        let (read, write) = transport.split();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let receiver = Receiver::new(read, requested).spawn(inbound_tx);
        receiver.set_version(version);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let session = Session {
            transport: write,
            version,
            receiver,
            subscriptions: HashMap::new(),
            callbacks: CallbackTable::default(),
            next_subscription_id: 0,
            send_to_caller: false,
            pull_outstanding: false,
            events: events_tx,
        };
        tokio::spawn(session.run(commands_rx, inbound_rx));

        Ok(StompClient {
            commands: commands_tx,
            events: events_rx,
            version,
        })
    }

    /// The protocol version negotiated during the handshake.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Subscribes to a destination. The subscription id is taken from an
    /// `id` header when supplied, otherwise from the session counter; the
    /// ack mode from an `ack` header, defaulting to `auto`. Fails with
    /// [`StompError::AlreadySubscribed`] when the destination already has a
    /// subscription.
    pub async fn subscribe(
        &self,
        destination: &str,
        headers: Vec<(String, String)>,
        options: SubscribeOptions,
    ) -> StompResult<()> {
        let destination = destination.to_string();
        self.request(|reply| SessionCommand::Subscribe {
            destination,
            headers,
            options,
            reply,
        })
        .await?
    }

    /// Removes the subscription for a destination, sending UNSUBSCRIBE with
    /// its recorded id.
    pub async fn unsubscribe(&self, destination: &str) -> StompResult<()> {
        let destination = destination.to_string();
        self.request(|reply| SessionCommand::Unsubscribe { destination, reply })
            .await?
    }

    /// Publishes a SEND frame with `destination` and `content-length`
    /// headers.
    pub async fn send(&self, destination: &str, body: impl Into<Vec<u8>>) -> StompResult<()> {
        let destination = destination.to_string();
        let body = body.into();
        self.request(|reply| SessionCommand::Send {
            destination,
            body,
            reply,
        })
        .await?
    }

    /// Acknowledges a received MESSAGE frame using the version-appropriate
    /// id header.
    pub async fn ack(&self, frame: &Frame) -> StompResult<()> {
        let frame = frame.clone();
        self.request(|reply| SessionCommand::Ack { frame, reply })
            .await?
    }

    /// Negatively acknowledges a received MESSAGE frame. NACK does not exist
    /// under STOMP 1.0; there the operation logs a warning and sends
    /// nothing.
    pub async fn nack(&self, frame: &Frame) -> StompResult<()> {
        let frame = frame.clone();
        self.request(|reply| SessionCommand::Nack { frame, reply })
            .await?
    }

    /// Registers a message callback for a destination. Callbacks run in
    /// registration order inside the session task. The returned id is the
    /// removal token.
    pub async fn register_callback(
        &self,
        destination: &str,
        callback: impl FnMut(&Frame) + Send + 'static,
    ) -> StompResult<CallbackId> {
        let destination = destination.to_string();
        let callback: MessageCallback = Box::new(callback);
        self.request(|reply| SessionCommand::RegisterCallback {
            destination,
            callback,
            reply,
        })
        .await
    }

    /// Removes a previously registered callback by its id.
    pub async fn remove_callback(&self, destination: &str, id: CallbackId) -> StompResult<()> {
        let destination = destination.to_string();
        self.request(|reply| SessionCommand::RemoveCallback {
            destination,
            id,
            reply,
        })
        .await
    }

    /// Switches between callback dispatch and forwarding messages to the
    /// owner's event stream.
    pub async fn set_send_to_caller(&self, enabled: bool) -> StompResult<()> {
        self.request(|reply| SessionCommand::SetSendToCaller { enabled, reply })
            .await
    }

    /// The next owner notification: forwarded messages (in send-to-caller
    /// mode), receipts, server errors, or the final `Dropped`. `None` once
    /// the session is gone and the event queue is drained.
    pub async fn next_event(&mut self) -> Option<StompEvent> {
        self.events.recv().await
    }

    /// Sends DISCONNECT, stops the receiver and closes the socket.
    pub async fn disconnect(&mut self) -> StompResult<()> {
        self.request(|reply| SessionCommand::Disconnect { reply })
            .await?
    }

    async fn request<R>(
        &self,
        build: impl FnOnce(oneshot::Sender<R>) -> SessionCommand,
    ) -> StompResult<R> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| StompError::ConnectionClosed)?;
        response.await.map_err(|_| StompError::ConnectionClosed)
    }
}

/// The session task state. Everything here is owned by one task and mutated
/// only between awaits of its event loop.
struct Session {
    transport: WriteTransport,
    version: Version,
    receiver: ReceiverHandle,
    subscriptions: HashMap<String, Subscription>,
    callbacks: CallbackTable,
    next_subscription_id: u64,
    send_to_caller: bool,
    pull_outstanding: bool,
    events: mpsc::UnboundedSender<StompEvent>,
}

impl Session {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<SessionCommand>,
        mut inbound: mpsc::UnboundedReceiver<ReceiverEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command).await {
                                break;
                            }
                        }
                        // Client handle dropped; tear the session down.
                        None => break,
                    }
                }
                event = inbound.recv() => {
                    match event {
                        Some(ReceiverEvent::Frame(frame)) => {
                            self.pull_outstanding = false;
                            self.handle_frame(frame);
                            self.request_frame();
                        }
                        Some(ReceiverEvent::Failed(err)) => {
                            tracing::warn!(error = %err, "receiver stopped");
                            let _ = self.events.send(StompEvent::Dropped(err));
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        self.receiver.shutdown();
        if let Err(err) = self.transport.close().await {
            tracing::debug!(error = %err, "error closing transport");
        }
        tracing::info!("session stopped");
    }

    /// Processes one request to completion. Returns true when the session
    /// should stop.
    async fn handle_command(&mut self, command: SessionCommand) -> bool {
        match command {
            SessionCommand::Subscribe {
                destination,
                headers,
                options,
                reply,
            } => {
                let result = self.subscribe(destination, headers, options).await;
                finish(reply, result)
            }
            SessionCommand::Unsubscribe { destination, reply } => {
                let result = self.unsubscribe(destination).await;
                finish(reply, result)
            }
            SessionCommand::Send {
                destination,
                body,
                reply,
            } => {
                let frame = FrameBuilder::send(&destination)
                    .header("content-length", body.len().to_string())
                    .body(body)
                    .build();
                let result = self.write_frame(&frame).await;
                finish(reply, result)
            }
            SessionCommand::Ack { frame, reply } => {
                let result = self.acknowledge(&frame, false).await;
                finish(reply, result)
            }
            SessionCommand::Nack { frame, reply } => {
                let result = self.acknowledge(&frame, true).await;
                finish(reply, result)
            }
            SessionCommand::RegisterCallback {
                destination,
                callback,
                reply,
            } => {
                let id = self.callbacks.register(&destination, callback);
                let _ = reply.send(id);
                false
            }
            SessionCommand::RemoveCallback {
                destination,
                id,
                reply,
            } => {
                self.callbacks.remove(&destination, id);
                let _ = reply.send(());
                false
            }
            SessionCommand::SetSendToCaller { enabled, reply } => {
                self.send_to_caller = enabled;
                let _ = reply.send(());
                false
            }
            SessionCommand::Disconnect { reply } => {
                let result = self.write_frame(&FrameBuilder::disconnect().build()).await;
                tracing::info!("disconnecting");
                let _ = reply.send(result);
                true
            }
        }
    }

    async fn subscribe(
        &mut self,
        destination: String,
        headers: Vec<(String, String)>,
        options: SubscribeOptions,
    ) -> StompResult<()> {
        if self.subscriptions.contains_key(&destination) {
            return Err(StompError::AlreadySubscribed(destination));
        }

        let id = match headers.iter().find(|(name, _)| name == "id") {
            Some((_, id)) => id.clone(),
            None => {
                let id = self.next_subscription_id.to_string();
                self.next_subscription_id += 1;
                id
            }
        };
        let ack = match headers.iter().find(|(name, _)| name == "ack") {
            Some((_, value)) => AckMode::parse(value).unwrap_or_else(|| {
                tracing::warn!(ack = %value, "unknown ack mode, using auto");
                AckMode::Auto
            }),
            None => AckMode::Auto,
        };

        let frame = FrameBuilder::subscribe(&destination, &id)
            .header("ack", ack.as_str())
            .headers(
                headers
                    .iter()
                    .filter(|(name, _)| name != "id" && name != "ack" && name != "destination")
                    .cloned(),
            )
            .build();
        self.write_frame(&frame).await?;

        self.subscriptions.insert(
            destination,
            Subscription {
                id,
                ack,
                compressed: options.compressed,
            },
        );
        self.request_frame();
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: String) -> StompResult<()> {
        let Some(subscription) = self.subscriptions.remove(&destination) else {
            return Err(StompError::NotSubscribed(destination));
        };
        let frame = FrameBuilder::unsubscribe(&subscription.id).build();
        self.write_frame(&frame).await
    }

    async fn acknowledge(&mut self, frame: &Frame, negative: bool) -> StompResult<()> {
        if negative && !protocol::valid_command(Command::Nack, self.version) {
            let err = StompError::VersionUnsupported("NACK");
            tracing::warn!(version = %self.version, error = %err, "skipping");
            return Ok(());
        }

        let source = protocol::ack_header(self.version);
        let Some(id) = frame.header(source) else {
            tracing::warn!(header = source, "frame carries no ack id, skipping");
            return Ok(());
        };
        // 1.2 echoes the ack id in an `id` header; 1.0/1.1 acknowledge by
        // message-id.
        let name = match self.version {
            Version::V1_2 => "id",
            Version::V1_0 | Version::V1_1 => "message-id",
        };
        let builder = if negative {
            FrameBuilder::nack()
        } else {
            FrameBuilder::ack()
        };
        self.write_frame(&builder.header(name, id).build()).await
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame.command {
            Command::Heartbeat => {
                tracing::debug!("discarding heartbeat");
            }
            Command::Message => self.dispatch_message(frame),
            Command::Receipt => {
                let _ = self.events.send(StompEvent::Receipt(frame));
            }
            Command::Error => {
                tracing::warn!(
                    reason = frame.header("message").unwrap_or(""),
                    "server error frame"
                );
                let _ = self.events.send(StompEvent::ServerError(frame));
            }
            other => {
                tracing::debug!(command = %other, "ignoring unexpected frame");
            }
        }
    }

    fn dispatch_message(&mut self, mut frame: Frame) {
        let Some(destination) = frame.header("destination").map(str::to_string) else {
            tracing::warn!("MESSAGE frame without destination, dropping");
            return;
        };

        let compressed = self
            .subscriptions
            .get(&destination)
            .is_some_and(|subscription| subscription.compressed);
        if compressed {
            match decompress_gzip(&frame.body) {
                Ok(body) => frame.body = body,
                Err(err) => {
                    let err = StompError::BodyDecompression(err);
                    tracing::warn!(%destination, error = %err, "dropping message");
                    return;
                }
            }
        }

        if self.send_to_caller {
            let _ = self.events.send(StompEvent::Message { destination, frame });
        } else {
            self.callbacks.dispatch(&destination, &frame);
        }
    }

    /// Keeps exactly one pull outstanding towards the receiver.
    fn request_frame(&mut self) {
        if !self.pull_outstanding {
            self.receiver.request_next_frame();
            self.pull_outstanding = true;
        }
    }

    async fn write_frame(&mut self, frame: &Frame) -> StompResult<()> {
        tracing::debug!(command = %frame.command, "sending frame");
        self.transport
            .send(&frame.to_bytes())
            .await
            .map_err(StompError::Transport)
    }
}

/// Replies to the caller and reports whether the failure was fatal to the
/// connection. Transport write failures stop the session; precondition
/// failures do not.
fn finish(reply: oneshot::Sender<StompResult<()>>, result: StompResult<()>) -> bool {
    let fatal = matches!(result, Err(StompError::Transport(_)));
    let _ = reply.send(result);
    fatal
}

fn decompress_gzip(body: &[u8]) -> io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(body);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded)?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;

    #[test]
    fn gzip_roundtrip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"a body worth compressing").unwrap();
        let compressed = encoder.finish().unwrap();

        let decoded = decompress_gzip(&compressed).unwrap();
        assert_eq!(decoded, b"a body worth compressing");
    }

    #[test]
    fn gzip_garbage_is_an_error() {
        assert!(decompress_gzip(b"definitely not gzip").is_err());
    }
}
