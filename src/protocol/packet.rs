//! Typed packet records for both directions of the wire.
//!
//! [`Request`] covers every client-initiated kind, [`Response`] the bodies
//! the server sends back for synchronous requests, and [`Notice`] the
//! server-initiated notifications that arrive with the async frame id.

use bytes::Bytes;

use super::packet_type;

/// A client-initiated packet, one variant per wire kind.
#[derive(Debug, Clone)]
pub enum Request {
    Connect {
        service: String,
        computer: String,
        user: String,
        process: String,
        version: String,
    },
    ClientDisconnect {
        service: String,
        computer: String,
    },
    CreateConversation {
        service: String,
        topic: String,
    },
    DestroyConversation {
        handle: u32,
        conv_id: u32,
    },
    Request {
        handle: u32,
        conv_id: u32,
        item: String,
        format: u32,
    },
    Poke {
        handle: u32,
        conv_id: u32,
        item: String,
        format: u32,
        data: Bytes,
    },
    Execute {
        handle: u32,
        conv_id: u32,
        command: String,
    },
    StartAdvise {
        handle: u32,
        conv_id: u32,
        item: String,
        format: u32,
        /// Wire flag selecting deferred failure reporting. The client always
        /// sends `false` so advise start failures surface on the call itself.
        asynchronous: bool,
        request_value: bool,
    },
    StopAdvise {
        handle: u32,
        conv_id: u32,
        item: String,
        format: u32,
    },
}

impl Request {
    /// Wire type value for this packet kind.
    pub fn packet_type(&self) -> u32 {
        match self {
            Request::Connect { .. } => packet_type::NETDDE_CLIENT_CONNECT,
            Request::ClientDisconnect { .. } => packet_type::NETDDE_CLIENT_DISCONNECT,
            Request::CreateConversation { .. } => packet_type::DDE_CREATE_CONVERSATION,
            Request::DestroyConversation { .. } => packet_type::DDE_DESTROY_CONVERSATION,
            Request::Request { .. } => packet_type::DDE_REQUEST,
            Request::Poke { .. } => packet_type::DDE_POKE,
            Request::Execute { .. } => packet_type::DDE_EXECUTE,
            Request::StartAdvise { .. } => packet_type::DDE_START_ADVISE,
            Request::StopAdvise { .. } => packet_type::DDE_STOP_ADVISE,
        }
    }

    /// Whether the protocol defines a response for this kind.
    ///
    /// Client-disconnect, destroy-conversation and stop-advise are
    /// fire-and-forget: the send completes once the frame is flushed.
    pub fn expects_response(&self) -> bool {
        !matches!(
            self,
            Request::ClientDisconnect { .. }
                | Request::DestroyConversation { .. }
                | Request::StopAdvise { .. }
        )
    }
}

/// Server response body for a synchronous request, matched to its caller by
/// frame id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Connect { result: bool, version: String },
    CreateConversation { result: bool, handle: u32, conv_id: u32 },
    Request { result: bool, data: Bytes },
    Poke { result: bool },
    Execute { result: bool },
    StartAdvise { result: bool },
}

/// Server-initiated notification, always carried by the async frame id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// The whole server is shutting down; conversations are already closed
    /// on the remote side.
    ServerDisconnect,
    /// A single conversation was closed by the server.
    ConversationDisconnect { handle: u32 },
    /// Push update for an item under advise.
    Advise {
        handle: u32,
        item: String,
        format: u32,
        data: Bytes,
    },
    /// Deferred advise start failure. Only sent for advises requested in
    /// asynchronous mode, which this client never uses.
    AdviseStartFailed { handle: u32, item: String, format: u32 },
}

/// A decoded inbound frame: the wire id plus its typed body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: u32,
    pub body: PacketBody,
}

/// Body of an inbound frame, split by protocol direction semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Response(Response),
    Notice(Notice),
}
