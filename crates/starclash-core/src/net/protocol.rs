use serde::{Deserialize, Serialize};

use super::messages::{
    BumpTileMsg, CollectStarMsg, EndGameMsg, EventKind, MatchEvent, PickupRequestMsg,
    PlayerFinishedLoadingMsg, PropertySyncMsg, ResetTilesMsg, SetTileBatchMsg, SetTileMsg,
    SpawnDestructiblePipeMsg, SpawnEnemiesMsg, SpawnParticleMsg, SpawnStarMsg,
    TileInteractRequestMsg,
};
use super::relay::{Outgoing, SendOptions};

/// Current protocol version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Maximum encoded event size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024; // 64 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    UnknownEventKind(u8),
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::UnknownEventKind(b) => write!(f, "unknown event kind: 0x{b:02x}"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Encode a serializable payload with a 1-byte kind prefix.
pub fn encode_message<T: Serialize>(
    kind: EventKind,
    payload: &T,
) -> Result<Vec<u8>, ProtocolError> {
    let payload_bytes =
        rmp_serde::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    let total = 1 + payload_bytes.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(total));
    }
    let mut buf = Vec::with_capacity(total);
    buf.push(kind as u8);
    buf.extend_from_slice(&payload_bytes);
    Ok(buf)
}

/// Encode a `MatchEvent` to wire format.
pub fn encode_event(event: &MatchEvent) -> Result<Vec<u8>, ProtocolError> {
    let kind = event.kind();
    match event {
        MatchEvent::PropertySync(m) => encode_message(kind, m),
        MatchEvent::PickupRequest(m) => encode_message(kind, m),
        MatchEvent::TileInteractRequest(m) => encode_message(kind, m),
        MatchEvent::SetTile(m) => encode_message(kind, m),
        MatchEvent::SetTileBatch(m) => encode_message(kind, m),
        MatchEvent::BumpTile(m) => encode_message(kind, m),
        MatchEvent::ResetTiles(m) => encode_message(kind, m),
        MatchEvent::SpawnParticle(m) => encode_message(kind, m),
        MatchEvent::SpawnDestructiblePipe(m) => encode_message(kind, m),
        MatchEvent::PlayerFinishedLoading(m) => encode_message(kind, m),
        MatchEvent::SpawnEnemies(m) => encode_message(kind, m),
        MatchEvent::EndGame(m) => encode_message(kind, m),
        MatchEvent::SpawnStar(m) => encode_message(kind, m),
        MatchEvent::CollectStar(m) => encode_message(kind, m),
    }
}

/// Encode an outbox entry into the frame and options handed to the transport.
/// A cache removal carries only the kind byte.
pub fn encode_outgoing(
    outgoing: &Outgoing<MatchEvent>,
) -> Result<(Vec<u8>, SendOptions), ProtocolError> {
    match outgoing {
        Outgoing::Event(event, options) => Ok((encode_event(event)?, *options)),
        Outgoing::Uncache(kind) => Ok((vec![*kind as u8], SendOptions::remove_cached())),
    }
}

/// Extract the event kind byte from raw wire data.
pub fn decode_event_kind(data: &[u8]) -> Result<EventKind, ProtocolError> {
    let Some(&first) = data.first() else {
        return Err(ProtocolError::EmptyMessage);
    };
    EventKind::from_byte(first).ok_or(ProtocolError::UnknownEventKind(first))
}

/// Decode a MessagePack payload (bytes after the kind prefix).
pub fn decode_payload<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    rmp_serde::from_slice(&data[1..]).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Decode raw wire data into a `MatchEvent`.
pub fn decode_event(data: &[u8]) -> Result<MatchEvent, ProtocolError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    let event = match decode_event_kind(data)? {
        EventKind::PropertySync => {
            MatchEvent::PropertySync(decode_payload::<PropertySyncMsg>(data)?)
        },
        EventKind::PickupRequest => {
            MatchEvent::PickupRequest(decode_payload::<PickupRequestMsg>(data)?)
        },
        EventKind::TileInteractRequest => MatchEvent::TileInteractRequest(decode_payload::<
            TileInteractRequestMsg,
        >(data)?),
        EventKind::SetTile => MatchEvent::SetTile(decode_payload::<SetTileMsg>(data)?),
        EventKind::SetTileBatch => {
            MatchEvent::SetTileBatch(decode_payload::<SetTileBatchMsg>(data)?)
        },
        EventKind::BumpTile => MatchEvent::BumpTile(decode_payload::<BumpTileMsg>(data)?),
        EventKind::ResetTiles => MatchEvent::ResetTiles(decode_payload::<ResetTilesMsg>(data)?),
        EventKind::SpawnParticle => {
            MatchEvent::SpawnParticle(decode_payload::<SpawnParticleMsg>(data)?)
        },
        EventKind::SpawnDestructiblePipe => MatchEvent::SpawnDestructiblePipe(decode_payload::<
            SpawnDestructiblePipeMsg,
        >(data)?),
        EventKind::PlayerFinishedLoading => MatchEvent::PlayerFinishedLoading(decode_payload::<
            PlayerFinishedLoadingMsg,
        >(data)?),
        EventKind::SpawnEnemies => {
            MatchEvent::SpawnEnemies(decode_payload::<SpawnEnemiesMsg>(data)?)
        },
        EventKind::EndGame => MatchEvent::EndGame(decode_payload::<EndGameMsg>(data)?),
        EventKind::SpawnStar => MatchEvent::SpawnStar(decode_payload::<SpawnStarMsg>(data)?),
        EventKind::CollectStar => {
            MatchEvent::CollectStar(decode_payload::<CollectStarMsg>(data)?)
        },
    };
    Ok(event)
}
