//! Request/event multiplexer for a single NetDDE session.
//!
//! The endpoint owns the transport's write half and the table of
//! outstanding synchronous requests. Outbound packets get a wrapping
//! sequence id in `[1, 0xFFFF]`; inbound packets either complete the
//! matching pending request (by id) or surface as server notices for the
//! client to react to. Responses are correlated purely by id, so
//! out-of-order answers still reach the right caller.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::error::{NetDdeError, Result};
use crate::protocol::{
    serialize, Notice, Packet, PacketBody, Request, Response, ASYNC_PACKET_ID, MAX_PACKET_ID,
};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Protocol-level session over one transport connection.
pub struct Endpoint {
    /// Transport write half; `None` once closed.
    writer: tokio::sync::Mutex<Option<BoxedWriter>>,
    /// Outstanding synchronous requests keyed by frame id.
    pending: Mutex<HashMap<u32, oneshot::Sender<Response>>>,
    /// Last id handed out; wraps from 0xFFFF back to 1.
    last_id: Mutex<u32>,
    /// Per-request response timeout; `None` disables the timers.
    timeout: Option<Duration>,
}

impl Endpoint {
    /// Create an endpoint over the transport's write half.
    ///
    /// A zero `timeout` disables per-request timers, matching an absent one.
    pub fn new(writer: BoxedWriter, timeout: Option<Duration>) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(Some(writer)),
            pending: Mutex::new(HashMap::new()),
            last_id: Mutex::new(0),
            timeout: timeout.filter(|t| !t.is_zero()),
        }
    }

    fn next_id(&self) -> u32 {
        let mut id = self.last_id.lock();
        *id += 1;
        if *id > MAX_PACKET_ID {
            *id = 1;
        }
        *id
    }

    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(NetDdeError::ConnectionClosed)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Send a packet and, for request kinds that define one, await the
    /// matching response.
    ///
    /// Fire-and-forget kinds resolve to `None` as soon as the frame is
    /// flushed. For all other kinds the call completes when the matching
    /// response arrives, the per-request timeout fires (failing only this
    /// caller and discarding its pending entry), or the endpoint is
    /// destroyed (failing every waiter with [`NetDdeError::Interrupted`]).
    pub async fn send(&self, request: &Request) -> Result<Option<Response>> {
        let id = self.next_id();
        let frame = serialize(id, request)?;
        tracing::debug!(id, packet_type = request.packet_type(), "sending packet");

        if !request.expects_response() {
            self.write_frame(frame).await?;
            return Ok(None);
        }

        // register before writing so a fast response can't miss the entry
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.write_frame(frame).await {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        let response = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(received) => received,
                Err(_) => {
                    self.pending.lock().remove(&id);
                    return Err(NetDdeError::ResponseTimeout(request.packet_type()));
                }
            },
            None => rx.await,
        };

        response.map(Some).map_err(|_| NetDdeError::Interrupted)
    }

    /// Route one decoded inbound packet.
    ///
    /// Async-id packets come back as notices for the caller to handle;
    /// sync-id packets complete their pending request. A packet that fits
    /// neither side of the sync/async split is a protocol error.
    pub fn dispatch(&self, packet: Packet) -> Result<Option<Notice>> {
        if packet.id == ASYNC_PACKET_ID {
            return match packet.body {
                PacketBody::Notice(notice) => Ok(Some(notice)),
                PacketBody::Response(_) => Err(NetDdeError::Protocol(
                    "response packet received with the async packet id".to_string(),
                )),
            };
        }

        let sender = self.pending.lock().remove(&packet.id).ok_or_else(|| {
            NetDdeError::Protocol(format!("unknown packet id [{}] received", packet.id))
        })?;

        match packet.body {
            PacketBody::Response(response) => {
                // the waiter may have timed out in the meantime
                let _ = sender.send(response);
                Ok(None)
            }
            PacketBody::Notice(_) => Err(NetDdeError::Protocol(format!(
                "notice packet received with sync packet id [{}]",
                packet.id
            ))),
        }
    }

    /// Fail every outstanding request with an interruption error and clear
    /// the table. Safe to call any number of times.
    pub fn destroy(&self) {
        let dropped = {
            let mut pending = self.pending.lock();
            let count = pending.len();
            pending.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!(dropped, "interrupted pending requests on endpoint destroy");
        }
    }

    /// Shut down and release the transport write half.
    ///
    /// The first call performs the TCP half-close; later calls are no-ops.
    pub async fn close_writer(&self) {
        let mut guard = self.writer.lock().await;
        if let Some(writer) = guard.as_mut() {
            let _ = writer.shutdown().await;
        }
        *guard = None;
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    #[cfg(test)]
    fn set_last_id(&self, id: u32) {
        *self.last_id.lock() = id;
    }
}
