//! The sending loop.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::file::FileChunker;
use crate::protocol::{ChannelMessage, ChunkFrame, ControlMessage, TransferId};
use crate::transport::PeerChannel;

/// Pacing of the sending loop.
#[derive(Debug, Clone, Copy)]
pub struct SendOptions {
    /// Maximum bytes per chunk frame
    pub chunk_size: usize,
    /// Extra pause after each chunk
    pub pause: Duration,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            pause: Duration::ZERO,
        }
    }
}

/// Stream `data` as transfer `id`: `fileSize`, chunks, then `end`.
///
/// Cancellation and channel state are checked before every chunk. On
/// cancellation a best-effort `stop` is sent. `on_progress` receives the
/// running total of bytes handed to the channel. Returns the bytes sent.
///
/// # Errors
///
/// Returns [`Error::TransferAborted`] when cancelled and
/// [`Error::ChannelClosed`] when the channel dies mid-transfer.
pub async fn send_file(
    channel: &PeerChannel,
    id: TransferId,
    file_name: &str,
    data: &[u8],
    options: SendOptions,
    cancel: &CancellationToken,
    mut on_progress: impl FnMut(u64) + Send,
) -> Result<u64> {
    let announce = ControlMessage::FileSize {
        file_name: file_name.to_string(),
        transfer_id: id,
        size: data.len() as u64,
    };
    send_or_cancel(channel, announce.into(), cancel, id).await?;

    let chunker = FileChunker::new(options.chunk_size.max(1));
    let mut sent = 0u64;

    for range in chunker.ranges(data.len()) {
        if !channel.is_open() {
            return Err(Error::ChannelClosed);
        }
        let chunk = ChunkFrame {
            transfer_id: id,
            data: data[range].to_vec(),
        };
        let len = chunk.data.len() as u64;
        send_or_cancel(channel, chunk.into(), cancel, id).await?;

        sent += len;
        on_progress(sent);

        tokio::task::yield_now().await;
        if !options.pause.is_zero() {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(options.pause) => {}
            }
        }
    }

    send_or_cancel(channel, ControlMessage::End { transfer_id: id }.into(), cancel, id).await?;
    tracing::debug!("Sent '{}' ({} bytes)", file_name, sent);
    Ok(sent)
}

async fn send_or_cancel(
    channel: &PeerChannel,
    message: ChannelMessage,
    cancel: &CancellationToken,
    id: TransferId,
) -> Result<()> {
    if !cancel.is_cancelled() {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {}
            result = channel.send(message) => return result,
        }
    }
    if channel.is_open() {
        let _ = channel.send(ControlMessage::Stop { transfer_id: id }).await;
    }
    Err(Error::TransferAborted(id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::TransferCoordinator;
    use crate::protocol::ClientId;
    use std::time::Instant;

    const C: usize = 16;

    async fn round_trip(len: usize) {
        let data: Vec<u8> = (0..len).map(|_| rand::random::<u8>()).collect();
        let (channel, mut rx) = PeerChannel::pair(1024);
        let id = TransferId::new();
        let cancel = CancellationToken::new();
        let options = SendOptions {
            chunk_size: C,
            pause: Duration::ZERO,
        };

        let mut reported = Vec::new();
        let sent = send_file(&channel, id, "f.bin", &data, options, &cancel, |n| reported.push(n))
            .await
            .unwrap();
        assert_eq!(sent, len as u64);
        assert!(reported.windows(2).all(|w| w[0] < w[1]));
        drop(channel);

        let peer = ClientId::from("owner");
        let mut coordinator = TransferCoordinator::new();
        coordinator.expect(id, peer.clone(), "f.bin".into(), Instant::now());

        let mut chunks = 0;
        let mut received = None;
        while let Some(message) = rx.recv().await {
            match message {
                ChannelMessage::Control(ControlMessage::FileSize { file_name, size, .. }) => {
                    coordinator.on_file_size(&peer, id, file_name, size, Instant::now());
                }
                ChannelMessage::Chunk(chunk) => {
                    assert!(chunk.data.len() <= C);
                    chunks += 1;
                    coordinator.on_chunk(&peer, chunk, Instant::now()).unwrap();
                }
                ChannelMessage::Control(ControlMessage::End { transfer_id }) => {
                    received = Some(coordinator.on_end(&peer, transfer_id).unwrap());
                }
                other => panic!("unexpected message {other:?}"),
            }
        }

        assert_eq!(chunks, len.div_ceil(C));
        let received = received.expect("no end frame");
        assert_eq!(received.data, data);
    }

    #[tokio::test]
    async fn test_round_trip_sizes() {
        for len in [0, 1, C - 1, C, C + 1, 10 * C] {
            round_trip(len).await;
        }
    }

    #[tokio::test]
    async fn test_cancel_sends_stop() {
        let (channel, mut rx) = PeerChannel::pair(1024);
        let id = TransferId::new();
        let cancel = CancellationToken::new();
        let data = vec![7u8; 64];
        let options = SendOptions {
            chunk_size: 8,
            pause: Duration::ZERO,
        };

        let cancel_after = cancel.clone();
        let result = send_file(&channel, id, "f", &data, options, &cancel, move |sent| {
            if sent >= 16 {
                cancel_after.cancel();
            }
        })
        .await;
        assert!(matches!(result, Err(Error::TransferAborted(_))));
        drop(channel);

        let mut last = None;
        while let Some(message) = rx.recv().await {
            last = Some(message);
        }
        assert_eq!(
            last,
            Some(ChannelMessage::Control(ControlMessage::Stop { transfer_id: id }))
        );
    }

    #[tokio::test]
    async fn test_closed_channel_aborts() {
        let (channel, rx) = PeerChannel::pair(4);
        drop(rx);
        let result = send_file(
            &channel,
            TransferId::new(),
            "f",
            b"data",
            SendOptions::default(),
            &CancellationToken::new(),
            |_| {},
        )
        .await;
        assert!(matches!(result, Err(Error::ChannelClosed)));
    }
}
