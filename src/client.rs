//! NetDDE client - connection state machine and conversation manager.
//!
//! [`NetDdeClient`] drives one persistent connection: the connect
//! handshake, the topic <-> conversation tables, lock-guarded lazy
//! conversation creation, the data operations, and graceful or forced
//! disconnection. Server-pushed notifications reach callers through the
//! [`ClientEvent`] subscription channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::{broadcast, watch};

use crate::codec::{self, DdeData};
use crate::endpoint::Endpoint;
use crate::error::{NetDdeError, Result};
use crate::protocol::{Notice, Parser, Request, Response, CLIENT_VERSION};
use crate::transport::TcpTransport;

/// Fixed deadline for the graceful disconnect handshake.
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-request response timeout (10 s).
const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(10_000);

/// Capacity of the caller-facing event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration accepted at construction.
///
/// Identity fields left unset default to environment-derived values at
/// construction time. A zero `response_timeout` disables the per-request
/// timers altogether.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientOptions {
    /// Server host. Default `127.0.0.1`.
    pub host: String,
    /// Server port. Default `8888`.
    pub port: u16,
    /// Computer name reported in the handshake; defaults to the local
    /// hostname.
    pub computer: Option<String>,
    /// User name reported in the handshake; defaults to the local user.
    pub user: Option<String>,
    /// Process name reported in the handshake; defaults to the current
    /// executable name.
    pub process: Option<String>,
    /// Per-request response timeout. Default 10 s; zero disables.
    pub response_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 8888,
            computer: None,
            user: None,
            process: None,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }
}

/// Update pushed by the server for an item under advise.
#[derive(Debug, Clone)]
pub struct AdviseEvent {
    pub topic: String,
    pub item: String,
    pub format: u32,
    pub data: DdeData,
}

/// Caller-facing notifications emitted by a client instance.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Advise update for a subscribed item.
    Advise(AdviseEvent),
    /// The server closed a single conversation; its topic is detached.
    TopicDisconnect(String),
    /// The connection is gone and all session state has been reset.
    Closed,
    /// A session-level failure. Emitted after `Closed` when the failure
    /// forced teardown, on its own for observer-level protocol errors.
    Error(Arc<NetDdeError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Server-issued identity of an open conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Conversation {
    handle: u32,
    conv_id: u32,
}

/// Bidirectional topic <-> conversation mapping.
///
/// Both directions are only ever updated together, keeping the maps
/// mutual inverses.
#[derive(Default)]
struct ConversationTable {
    by_topic: HashMap<String, Conversation>,
    topic_by_handle: HashMap<u32, String>,
}

impl ConversationTable {
    fn get(&self, topic: &str) -> Option<Conversation> {
        self.by_topic.get(topic).copied()
    }

    fn insert(&mut self, topic: &str, conversation: Conversation) {
        self.by_topic.insert(topic.to_owned(), conversation);
        self.topic_by_handle
            .insert(conversation.handle, topic.to_owned());
    }

    fn remove_topic(&mut self, topic: &str) -> Option<Conversation> {
        let conversation = self.by_topic.remove(topic)?;
        self.topic_by_handle.remove(&conversation.handle);
        Some(conversation)
    }

    fn remove_handle(&mut self, handle: u32) -> Option<String> {
        let topic = self.topic_by_handle.remove(&handle)?;
        self.by_topic.remove(&topic);
        Some(topic)
    }

    fn topic_for(&self, handle: u32) -> Option<String> {
        self.topic_by_handle.get(&handle).cloned()
    }

    fn topics(&self) -> Vec<String> {
        self.by_topic.keys().cloned().collect()
    }

    fn clear(&mut self) {
        self.by_topic.clear();
        self.topic_by_handle.clear();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_topic.len()
    }
}

/// Handshake identity reported to the server.
struct Identity {
    service: String,
    computer: String,
    user: String,
    process: String,
}

struct Shared {
    identity: Identity,
    host: String,
    port: u16,
    response_timeout: Duration,
    state: Mutex<ConnectionState>,
    endpoint: Mutex<Option<Arc<Endpoint>>>,
    conversations: Mutex<ConversationTable>,
    /// Per-topic creation locks, created on first contended access and
    /// discarded once creation completes.
    creation_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Per-connection close signal: flips to `true` once teardown has run.
    gone: Mutex<Option<(watch::Sender<bool>, watch::Receiver<bool>)>>,
    events: broadcast::Sender<ClientEvent>,
}

impl Shared {
    /// Force the whole session down and reset every table.
    ///
    /// Idempotent: only the caller that takes the endpoint runs the reset
    /// and emits the close notification (plus the error, when one caused
    /// the teardown).
    async fn teardown(&self, reason: Option<NetDdeError>) {
        let endpoint = { self.endpoint.lock().take() };
        let Some(endpoint) = endpoint else { return };
        let gone_tx = { self.gone.lock().as_ref().map(|(tx, _)| tx.clone()) };

        tracing::debug!("tearing down NetDDE session");
        *self.state.lock() = ConnectionState::Disconnecting;

        endpoint.destroy();
        endpoint.close_writer().await;

        self.creation_locks.lock().clear();
        self.conversations.lock().clear();
        *self.state.lock() = ConnectionState::Disconnected;

        if let Some(gone_tx) = gone_tx {
            let _ = gone_tx.send(true);
        }

        let _ = self.events.send(ClientEvent::Closed);
        if let Some(error) = reason {
            let _ = self.events.send(ClientEvent::Error(Arc::new(error)));
        }
    }

    /// Graceful connection drop: release creation locks, notify the server,
    /// half-close the transport and wait for the close signal, racing the
    /// fixed disconnect deadline.
    async fn drop_connection(&self) -> Result<()> {
        self.creation_locks.lock().clear();

        let endpoint = { self.endpoint.lock().clone() };
        if let Some(endpoint) = endpoint {
            let notice = Request::ClientDisconnect {
                service: self.identity.service.clone(),
                computer: self.identity.computer.clone(),
            };
            if let Err(e) = endpoint.send(&notice).await {
                self.teardown(None).await;
                return Err(e);
            }
            endpoint.destroy();
            endpoint.close_writer().await;
        }

        let gone_rx = { self.gone.lock().as_ref().map(|(_, rx)| rx.clone()) };
        let Some(mut gone_rx) = gone_rx else {
            return Ok(());
        };

        let timed_out = tokio::time::timeout(DISCONNECT_TIMEOUT, gone_rx.wait_for(|gone| *gone))
            .await
            .is_err();
        if timed_out {
            self.teardown(None).await;
            Err(NetDdeError::DisconnectTimeout)
        } else {
            Ok(())
        }
    }

    async fn handle_notice(self: &Arc<Self>, notice: Notice) {
        match notice {
            Notice::ServerDisconnect => {
                // the server already closed every conversation on its side,
                // so only the connection itself is dropped
                tracing::debug!("server disconnect notice received");
                *self.state.lock() = ConnectionState::Disconnecting;

                let shared = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) = shared.drop_connection().await {
                        let _ = shared.events.send(ClientEvent::Error(Arc::new(e)));
                    }
                });
            }

            Notice::ConversationDisconnect { handle } => {
                let topic = { self.conversations.lock().remove_handle(handle) };
                match topic {
                    Some(topic) => {
                        tracing::debug!(topic = %topic, "conversation closed by server");
                        let _ = self.events.send(ClientEvent::TopicDisconnect(topic));
                    }
                    None => {
                        tracing::debug!(handle, "conversation disconnect for unknown handle")
                    }
                }
            }

            Notice::Advise {
                handle,
                item,
                format,
                data,
            } => {
                let topic = { self.conversations.lock().topic_for(handle) };
                let Some(topic) = topic else {
                    let error = NetDdeError::Protocol(format!(
                        "unknown handle [{handle:#x}] received on advise"
                    ));
                    let _ = self.events.send(ClientEvent::Error(Arc::new(error)));
                    return;
                };

                let event = AdviseEvent {
                    topic,
                    item,
                    format,
                    data: codec::decode(format, data),
                };
                if self.events.send(ClientEvent::Advise(event)).is_err() {
                    tracing::debug!("advise update dropped: no event subscribers");
                }
            }

            Notice::AdviseStartFailed { item, .. } => {
                // advises are always started with synchronous
                // acknowledgement, so failures already surfaced on the call
                tracing::debug!(item = %item, "ignoring advise-start-failed notice");
            }
        }
    }
}

/// Read loop for one connection: pull bytes, reassemble packets, dispatch.
///
/// Any transport error, transport close or endpoint-level protocol error
/// observed here forces full session teardown.
async fn read_loop(
    shared: Arc<Shared>,
    endpoint: Arc<Endpoint>,
    mut reader: OwnedReadHalf,
    mut gone: watch::Receiver<bool>,
) {
    let mut parser = Parser::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let read = tokio::select! {
            _ = gone.wait_for(|gone| *gone) => return,
            read = reader.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                shared.teardown(None).await;
                return;
            }
            Ok(n) => n,
            Err(e) => {
                shared.teardown(Some(NetDdeError::Io(e))).await;
                return;
            }
        };

        let packets = match parser.push(&buf[..n]) {
            Ok(packets) => packets,
            Err(e) => {
                shared.teardown(Some(e)).await;
                return;
            }
        };

        for packet in packets {
            match endpoint.dispatch(packet) {
                Ok(Some(notice)) => shared.handle_notice(notice).await,
                Ok(None) => {}
                Err(e) => {
                    shared.teardown(Some(e)).await;
                    return;
                }
            }
        }
    }
}

/// Client for one NetDDE server connection.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct NetDdeClient {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for NetDdeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetDdeClient").finish()
    }
}

impl NetDdeClient {
    /// Create a client for `service` with the given options.
    ///
    /// Fails synchronously when `service` is empty. No connection is made
    /// until [`connect`](Self::connect).
    pub fn new(service: impl Into<String>, options: ClientOptions) -> Result<Self> {
        let service = service.into();
        if service.is_empty() {
            return Err(NetDdeError::ServiceExpected);
        }

        let identity = Identity {
            service,
            computer: options.computer.unwrap_or_else(default_computer),
            user: options.user.unwrap_or_else(default_user),
            process: options.process.unwrap_or_else(default_process),
        };

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            shared: Arc::new(Shared {
                identity,
                host: options.host,
                port: options.port,
                response_timeout: options.response_timeout,
                state: Mutex::new(ConnectionState::Disconnected),
                endpoint: Mutex::new(None),
                conversations: Mutex::new(ConversationTable::default()),
                creation_locks: Mutex::new(HashMap::new()),
                gone: Mutex::new(None),
                events,
            }),
        })
    }

    /// Subscribe to the client's event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.shared.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.state.lock() == ConnectionState::Connected
    }

    /// Connect to the server and perform the protocol handshake.
    ///
    /// Only valid from the disconnected state. A transport failure reverts
    /// to disconnected without side effects; a handshake rejection tears
    /// the fresh session down and fails the call. On success returns the
    /// server version string.
    pub async fn connect(&self) -> Result<String> {
        {
            let mut state = self.shared.state.lock();
            if *state != ConnectionState::Disconnected {
                return Err(NetDdeError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let transport = match TcpTransport::connect(&self.shared.host, self.shared.port).await {
            Ok(transport) => transport,
            Err(e) => {
                *self.shared.state.lock() = ConnectionState::Disconnected;
                return Err(e);
            }
        };
        transport.tune_keepalive(self.shared.response_timeout);

        let (reader, writer) = transport.into_split();
        let endpoint = Arc::new(Endpoint::new(
            Box::new(writer),
            Some(self.shared.response_timeout),
        ));
        let (gone_tx, gone_rx) = watch::channel(false);
        *self.shared.endpoint.lock() = Some(Arc::clone(&endpoint));
        *self.shared.gone.lock() = Some((gone_tx, gone_rx.clone()));

        tokio::spawn(read_loop(
            Arc::clone(&self.shared),
            Arc::clone(&endpoint),
            reader,
            gone_rx,
        ));

        let identity = &self.shared.identity;
        let handshake = endpoint
            .send(&Request::Connect {
                service: identity.service.clone(),
                computer: identity.computer.clone(),
                user: identity.user.clone(),
                process: identity.process.clone(),
                version: CLIENT_VERSION.to_owned(),
            })
            .await;

        match handshake {
            Ok(Some(Response::Connect {
                result: true,
                version,
            })) => {
                *self.shared.state.lock() = ConnectionState::Connected;
                tracing::debug!(server_version = %version, "NetDDE session established");
                Ok(version)
            }
            Ok(Some(Response::Connect { result: false, .. })) => {
                self.shared.teardown(None).await;
                Err(NetDdeError::ServerRefused("opening connection"))
            }
            Ok(_) => {
                self.shared.teardown(None).await;
                Err(NetDdeError::Protocol(
                    "unexpected response to connect request".to_string(),
                ))
            }
            Err(e) => {
                self.shared.teardown(None).await;
                Err(e)
            }
        }
    }

    /// Gracefully disconnect from the server.
    ///
    /// No-op unless connected; rejects while the connection is still being
    /// set up. Destroys every open conversation one at a time, then drops
    /// the connection, bounded by a fixed 5 s deadline after which the
    /// session is forced down and the call fails.
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut state = self.shared.state.lock();
            match *state {
                ConnectionState::Connecting => {
                    return Err(NetDdeError::DisconnectWhileConnecting)
                }
                ConnectionState::Connected => *state = ConnectionState::Disconnecting,
                ConnectionState::Disconnected | ConnectionState::Disconnecting => return Ok(()),
            }
        }

        if let Err(e) = self.destroy_all_conversations().await {
            self.shared.teardown(None).await;
            return Err(e);
        }

        self.shared.drop_connection().await
    }

    /// Request the current value of `item` under `topic`.
    pub async fn request(&self, topic: &str, item: &str, format: u32) -> Result<DdeData> {
        self.ensure_connected()?;
        let conversation = self.conversation(topic).await?;

        let response = self
            .endpoint()?
            .send(&Request::Request {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
                item: item.to_owned(),
                format,
            })
            .await?;

        match response {
            Some(Response::Request { result: true, data }) => Ok(codec::decode(format, data)),
            Some(Response::Request { result: false, .. }) => {
                Err(NetDdeError::ServerRefused("requesting item"))
            }
            _ => Err(NetDdeError::Protocol(
                "unexpected response to item request".to_string(),
            )),
        }
    }

    /// Write `data` into `item` under `topic`.
    pub async fn poke(
        &self,
        topic: &str,
        item: &str,
        format: u32,
        data: impl Into<DdeData>,
    ) -> Result<()> {
        self.ensure_connected()?;
        let payload = codec::encode(format, &data.into())?;
        let conversation = self.conversation(topic).await?;

        let response = self
            .endpoint()?
            .send(&Request::Poke {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
                item: item.to_owned(),
                format,
                data: payload,
            })
            .await?;

        match response {
            Some(Response::Poke { result: true }) => Ok(()),
            Some(Response::Poke { result: false }) => {
                Err(NetDdeError::ServerRefused("poking item"))
            }
            _ => Err(NetDdeError::Protocol(
                "unexpected response to poke request".to_string(),
            )),
        }
    }

    /// Execute `command` on the server against `topic`.
    pub async fn execute(&self, topic: &str, command: &str) -> Result<()> {
        self.ensure_connected()?;
        let conversation = self.conversation(topic).await?;

        let response = self
            .endpoint()?
            .send(&Request::Execute {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
                command: command.to_owned(),
            })
            .await?;

        match response {
            Some(Response::Execute { result: true }) => Ok(()),
            Some(Response::Execute { result: false }) => {
                Err(NetDdeError::ServerRefused("executing command"))
            }
            _ => Err(NetDdeError::Protocol(
                "unexpected response to execute request".to_string(),
            )),
        }
    }

    /// Subscribe to push updates of `item` under `topic`.
    ///
    /// `request_value` asks the server for the current value right away.
    /// Updates arrive as [`ClientEvent::Advise`] on the event stream.
    pub async fn advise(
        &self,
        topic: &str,
        item: &str,
        format: u32,
        request_value: bool,
    ) -> Result<()> {
        self.ensure_connected()?;
        let conversation = self.conversation(topic).await?;

        // always ask for synchronous acknowledgement so a start failure
        // fails this call instead of arriving as a later notice
        let response = self
            .endpoint()?
            .send(&Request::StartAdvise {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
                item: item.to_owned(),
                format,
                asynchronous: false,
                request_value,
            })
            .await?;

        match response {
            Some(Response::StartAdvise { result: true }) => Ok(()),
            Some(Response::StartAdvise { result: false }) => {
                Err(NetDdeError::ServerRefused("starting advise of item"))
            }
            _ => Err(NetDdeError::Protocol(
                "unexpected response to start-advise request".to_string(),
            )),
        }
    }

    /// Stop a running advise subscription. Fire-and-forget on the wire.
    pub async fn stop_advise(&self, topic: &str, item: &str, format: u32) -> Result<()> {
        self.ensure_connected()?;
        let conversation = self.conversation(topic).await?;

        self.endpoint()?
            .send(&Request::StopAdvise {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
                item: item.to_owned(),
                format,
            })
            .await?;
        Ok(())
    }

    fn ensure_connected(&self) -> Result<()> {
        if *self.shared.state.lock() == ConnectionState::Connected {
            Ok(())
        } else {
            Err(NetDdeError::NotConnected)
        }
    }

    fn endpoint(&self) -> Result<Arc<Endpoint>> {
        self.shared
            .endpoint
            .lock()
            .clone()
            .ok_or(NetDdeError::NotConnected)
    }

    /// Resolve the conversation for `topic`, creating it on first use.
    ///
    /// Creation is serialized per topic: concurrent callers for the same
    /// unopened topic share a single create-conversation request and all
    /// see the identity it yields.
    async fn conversation(&self, topic: &str) -> Result<Conversation> {
        let existing = { self.shared.conversations.lock().get(topic) };
        if let Some(conversation) = existing {
            return Ok(conversation);
        }

        let lock = {
            let mut locks = self.shared.creation_locks.lock();
            Arc::clone(
                locks
                    .entry(topic.to_owned())
                    .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
            )
        };

        let guard = lock.lock().await;
        // a concurrent acquirer may have created it while we waited
        let existing = { self.shared.conversations.lock().get(topic) };
        let result = match existing {
            Some(conversation) => Ok(conversation),
            None => self.create_conversation(topic).await,
        };
        drop(guard);

        // contention is over either way; failed creations must not block
        // later attempts
        self.shared.creation_locks.lock().remove(topic);
        result
    }

    async fn create_conversation(&self, topic: &str) -> Result<Conversation> {
        tracing::debug!(topic = %topic, "creating conversation");

        let response = self
            .endpoint()?
            .send(&Request::CreateConversation {
                service: self.shared.identity.service.clone(),
                topic: topic.to_owned(),
            })
            .await?;

        match response {
            Some(Response::CreateConversation {
                result: true,
                handle,
                conv_id,
            }) => {
                let conversation = Conversation { handle, conv_id };
                self.shared.conversations.lock().insert(topic, conversation);
                Ok(conversation)
            }
            Some(Response::CreateConversation { result: false, .. }) => {
                Err(NetDdeError::ConversationRefused(topic.to_owned()))
            }
            _ => Err(NetDdeError::Protocol(
                "unexpected response to create-conversation request".to_string(),
            )),
        }
    }

    /// Drop the tables for `topic` and tell the server to destroy the
    /// conversation. The wire request is fire-and-forget.
    async fn destroy_conversation(&self, topic: &str) -> Result<()> {
        let conversation = { self.shared.conversations.lock().remove_topic(topic) };
        let Some(conversation) = conversation else {
            tracing::debug!(topic = %topic, "no conversation to destroy");
            return Ok(());
        };

        self.endpoint()?
            .send(&Request::DestroyConversation {
                handle: conversation.handle,
                conv_id: conversation.conv_id,
            })
            .await?;
        Ok(())
    }

    async fn destroy_all_conversations(&self) -> Result<()> {
        let topics = { self.shared.conversations.lock().topics() };
        for topic in topics {
            self.destroy_conversation(&topic).await?;
        }
        Ok(())
    }
}

fn default_computer() -> String {
    whoami::fallible::hostname().unwrap_or_else(|_| "localhost".to_owned())
}

fn default_user() -> String {
    whoami::username()
}

fn default_process() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "netdde-client".to_owned())
}
