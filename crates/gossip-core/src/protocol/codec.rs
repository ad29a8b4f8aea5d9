//! Fixed-width binary encoding of membership messages.
//!
//! All integers are big-endian:
//!
//! ```text
//! tag          u8    0 = join request, 1 = join reply, 2 = gossip
//! host         u32   sender
//! port         u16   sender
//! incarnation  u64   sender
//! count        u32   join reply / gossip only
//! count × (host u32, port u16, incarnation u64)
//! ```

use super::messages::{Heartbeat, Message, MessageKind};
use crate::PeerId;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Bytes in a sender heartbeat (host + port + incarnation).
pub const HEARTBEAT_LEN: usize = 4 + 2 + 8;

/// Total length of a join request.
pub const JOIN_REQUEST_LEN: usize = 1 + HEARTBEAT_LEN;

/// Fixed prefix of a join reply or gossip message, before its entries.
pub const SNAPSHOT_HEADER_LEN: usize = JOIN_REQUEST_LEN + 4;

/// Bytes per snapshot entry.
pub const SNAPSHOT_ENTRY_LEN: usize = HEARTBEAT_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
}

fn malformed(reason: impl Into<String>) -> CodecError {
    CodecError::MalformedMessage(reason.into())
}

/// Encode a message. Never fails.
pub fn encode(message: &Message) -> Bytes {
    let snapshot = message.snapshot();
    let capacity = match message.kind() {
        MessageKind::JoinRequest => JOIN_REQUEST_LEN,
        _ => SNAPSHOT_HEADER_LEN + snapshot.len() * SNAPSHOT_ENTRY_LEN,
    };

    let mut buf = BytesMut::with_capacity(capacity);
    buf.put_u8(message.kind() as u8);
    put_heartbeat(&mut buf, message.sender());

    if message.kind() != MessageKind::JoinRequest {
        buf.put_u32(snapshot.len() as u32);
        for heartbeat in snapshot {
            put_heartbeat(&mut buf, *heartbeat);
        }
    }

    buf.freeze()
}

/// Decode a message, never reading past `data`.
pub fn decode(data: &[u8]) -> Result<Message, CodecError> {
    let mut cursor = data;

    if !cursor.has_remaining() {
        return Err(malformed("empty buffer"));
    }
    let kind = MessageKind::try_from(cursor.get_u8())
        .map_err(|tag| malformed(format!("unknown tag {tag}")))?;

    let min_len = match kind {
        MessageKind::JoinRequest => JOIN_REQUEST_LEN,
        MessageKind::JoinReply | MessageKind::Gossip => SNAPSHOT_HEADER_LEN,
    };
    if data.len() < min_len {
        return Err(malformed(format!(
            "{kind:?} needs at least {min_len} bytes, got {}",
            data.len()
        )));
    }

    let sender = get_heartbeat(&mut cursor);

    let message = match kind {
        MessageKind::JoinRequest => Message::JoinRequest { sender },
        MessageKind::JoinReply | MessageKind::Gossip => {
            let count = cursor.get_u32() as usize;
            let needed = count
                .checked_mul(SNAPSHOT_ENTRY_LEN)
                .ok_or_else(|| malformed("snapshot count overflows"))?;
            if cursor.remaining() < needed {
                return Err(malformed(format!(
                    "snapshot declares {count} entries but only {} bytes follow",
                    cursor.remaining()
                )));
            }

            let snapshot = (0..count).map(|_| get_heartbeat(&mut cursor)).collect();
            if kind == MessageKind::JoinReply {
                Message::JoinReply { sender, snapshot }
            } else {
                Message::Gossip { sender, snapshot }
            }
        }
    };

    if cursor.has_remaining() {
        return Err(malformed(format!("{} trailing bytes", cursor.remaining())));
    }

    Ok(message)
}

fn put_heartbeat(buf: &mut BytesMut, heartbeat: Heartbeat) {
    buf.put_u32(heartbeat.peer_id.host());
    buf.put_u16(heartbeat.peer_id.port());
    buf.put_u64(heartbeat.incarnation);
}

// Caller checks that HEARTBEAT_LEN bytes remain.
fn get_heartbeat(cursor: &mut &[u8]) -> Heartbeat {
    let host = cursor.get_u32();
    let port = cursor.get_u16();
    let incarnation = cursor.get_u64();
    Heartbeat::new(PeerId::new(host, port), incarnation)
}
