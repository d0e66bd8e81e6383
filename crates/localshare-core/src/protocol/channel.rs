//! Messages carried over an established peer channel.
//!
//! Control messages are JSON. Chunk frames are binary:
//!
//! ```text
//! ┌──────────────────────┬──────────────────────────────┐
//! │     Transfer ID      │            Data              │
//! │      16 bytes        │   0..=chunk_size bytes       │
//! └──────────────────────┴──────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};

use super::{decode_payload, encode_payload, FrameType, TransferId};
use crate::error::{Error, Result};

/// JSON control message on a peer channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ControlMessage {
    /// Ask the owner to send a file
    Request {
        /// Advertised file name
        file_name: String,
        /// Id minted by the requester
        transfer_id: TransferId,
    },
    /// Sender announces the size before the first chunk
    FileSize {
        /// File name
        file_name: String,
        /// Transfer the size belongs to
        transfer_id: TransferId,
        /// Total bytes that will follow
        size: u64,
    },
    /// Every chunk of the transfer has been sent
    End {
        /// Finished transfer
        transfer_id: TransferId,
    },
    /// Sender cancelled the transfer
    Stop {
        /// Cancelled transfer
        transfer_id: TransferId,
    },
}

impl ControlMessage {
    /// Transfer this message refers to.
    pub const fn transfer_id(&self) -> TransferId {
        match self {
            Self::Request { transfer_id, .. }
            | Self::FileSize { transfer_id, .. }
            | Self::End { transfer_id }
            | Self::Stop { transfer_id } => *transfer_id,
        }
    }
}

/// One slice of a file in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkFrame {
    /// Transfer the bytes belong to
    pub transfer_id: TransferId,
    /// Raw bytes
    pub data: Vec<u8>,
}

impl ChunkFrame {
    /// Encode as transfer id header followed by the data.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(TransferId::LEN + self.data.len());
        buf.extend_from_slice(self.transfer_id.as_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }

    /// Decode a binary chunk frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is shorter than the header.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < TransferId::LEN {
            return Err(Error::ProtocolError(format!(
                "chunk frame too short: {} bytes",
                buf.len()
            )));
        }
        let (header, data) = buf.split_at(TransferId::LEN);
        let mut id = [0u8; TransferId::LEN];
        id.copy_from_slice(header);
        Ok(Self {
            transfer_id: TransferId::from_bytes(id),
            data: data.to_vec(),
        })
    }
}

/// Anything that travels over a peer channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// JSON control message
    Control(ControlMessage),
    /// Binary chunk frame
    Chunk(ChunkFrame),
}

impl ChannelMessage {
    /// Frame type and payload for a stream transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the control message cannot be serialized.
    pub fn to_frame(&self) -> Result<(FrameType, Vec<u8>)> {
        match self {
            Self::Control(msg) => Ok((FrameType::Control, encode_payload(msg)?)),
            Self::Chunk(chunk) => Ok((FrameType::Chunk, chunk.encode())),
        }
    }

    /// Rebuild from a received frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed payloads or frame types that do not
    /// carry channel messages.
    pub fn from_frame(frame_type: FrameType, payload: &[u8]) -> Result<Self> {
        match frame_type {
            FrameType::Control => Ok(Self::Control(decode_payload(payload)?)),
            FrameType::Chunk => Ok(Self::Chunk(ChunkFrame::decode(payload)?)),
            FrameType::Hello => Err(Error::ProtocolError(
                "unexpected hello on open channel".to_string(),
            )),
        }
    }
}

impl From<ControlMessage> for ChannelMessage {
    fn from(msg: ControlMessage) -> Self {
        Self::Control(msg)
    }
}

impl From<ChunkFrame> for ChannelMessage {
    fn from(chunk: ChunkFrame) -> Self {
        Self::Chunk(chunk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_wire_shape() {
        let id = TransferId::new();
        let msg = ControlMessage::FileSize {
            file_name: "a.bin".into(),
            transfer_id: id,
            size: 42,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], json!("fileSize"));
        assert_eq!(value["fileName"], json!("a.bin"));
        assert_eq!(value["size"], json!(42));
        assert!(value["transferId"].is_string());
        assert_eq!(msg.transfer_id(), id);
    }

    #[test]
    fn test_chunk_header() {
        let chunk = ChunkFrame {
            transfer_id: TransferId::new(),
            data: vec![1, 2, 3],
        };
        let encoded = chunk.encode();
        assert_eq!(encoded.len(), TransferId::LEN + 3);
        assert_eq!(&encoded[..TransferId::LEN], chunk.transfer_id.as_bytes());
        assert_eq!(ChunkFrame::decode(&encoded).unwrap(), chunk);
    }

    #[test]
    fn test_empty_chunk_and_short_frame() {
        let id = TransferId::new();
        let decoded = ChunkFrame::decode(id.as_bytes()).unwrap();
        assert_eq!(decoded.transfer_id, id);
        assert!(decoded.data.is_empty());

        assert!(ChunkFrame::decode(&[0u8; 15]).is_err());
    }

    #[test]
    fn test_frame_mapping() {
        let msg = ChannelMessage::from(ControlMessage::End {
            transfer_id: TransferId::new(),
        });
        let (frame_type, payload) = msg.to_frame().unwrap();
        assert_eq!(frame_type, FrameType::Control);
        assert_eq!(ChannelMessage::from_frame(frame_type, &payload).unwrap(), msg);

        assert!(ChannelMessage::from_frame(FrameType::Hello, b"x").is_err());
    }
}
