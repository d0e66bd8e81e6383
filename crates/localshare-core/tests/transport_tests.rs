//! TCP transport tests on loopback, signaled by hand.

mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tokio::sync::mpsc;

use localshare_core::protocol::{
    ChannelMessage, ChunkFrame, ControlMessage, SessionDescription, TransferId,
};
use localshare_core::transport::{
    PeerChannel, TcpTransport, TcpTransportFactory, Transport, TransportEvent, TransportFactory,
};

use common::within;

type Events = mpsc::UnboundedReceiver<TransportEvent>;

fn transport() -> (TcpTransport, Events) {
    let (tx, rx) = mpsc::unbounded_channel();
    let factory = TcpTransportFactory::new(16)
        .with_advertise_addr(Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    (factory.create(tx, None), rx)
}

async fn next_channel(events: &mut Events) -> PeerChannel {
    within(async {
        loop {
            match events.recv().await {
                Some(TransportEvent::ChannelOpen(channel)) => return channel,
                Some(TransportEvent::Closed(reason)) => panic!("closed: {reason:?}"),
                Some(_) => {}
                None => panic!("transport dropped"),
            }
        }
    })
    .await
}

async fn next_message(events: &mut Events) -> ChannelMessage {
    within(async {
        loop {
            match events.recv().await {
                Some(TransportEvent::Message(message)) => return message,
                Some(_) => {}
                None => panic!("transport dropped"),
            }
        }
    })
    .await
}

/// Run the offer/answer exchange and return both open channels.
async fn connect() -> (
    (TcpTransport, Events, PeerChannel),
    (TcpTransport, Events, PeerChannel),
) {
    let (mut offerer, mut offerer_events) = transport();
    let (mut answerer, mut answerer_events) = transport();

    let offer = offerer.create_offer().await.unwrap();
    offerer.set_local_description(offer.clone()).await.unwrap();
    let Some(TransportEvent::LocalCandidate(candidate)) = offerer_events.recv().await else {
        panic!("expected a local candidate");
    };

    answerer.set_remote_description(offer).await.unwrap();
    let answer = answerer.create_answer().await.unwrap();
    answerer.set_local_description(answer.clone()).await.unwrap();
    answerer.add_ice_candidate(candidate).await.unwrap();
    offerer.set_remote_description(answer).await.unwrap();

    let offerer_channel = next_channel(&mut offerer_events).await;
    let answerer_channel = next_channel(&mut answerer_events).await;
    (
        (offerer, offerer_events, offerer_channel),
        (answerer, answerer_events, answerer_channel),
    )
}

#[tokio::test]
async fn test_channel_carries_frames_both_ways() {
    let (offerer, answerer) = connect().await;
    let (_offerer, mut offerer_events, offerer_channel) = offerer;
    let (_answerer, mut answerer_events, answerer_channel) = answerer;

    let id = TransferId::new();
    answerer_channel
        .send(ControlMessage::Request {
            file_name: "a.txt".into(),
            transfer_id: id,
        })
        .await
        .unwrap();
    assert_eq!(
        next_message(&mut offerer_events).await,
        ChannelMessage::Control(ControlMessage::Request {
            file_name: "a.txt".into(),
            transfer_id: id,
        })
    );

    let data = common::random_bytes(70_000);
    offerer_channel
        .send(ChunkFrame {
            transfer_id: id,
            data: data.clone(),
        })
        .await
        .unwrap();
    match next_message(&mut answerer_events).await {
        ChannelMessage::Chunk(chunk) => {
            assert_eq!(chunk.transfer_id, id);
            assert_eq!(chunk.data, data);
        }
        other => panic!("expected chunk, got {other:?}"),
    }
}

#[tokio::test]
async fn test_close_is_reported_to_peer() {
    let ((mut offerer, _offerer_events, _), (_answerer, mut answerer_events, _)) =
        connect().await;

    offerer.close().await;

    let closed = within(async {
        loop {
            match answerer_events.recv().await {
                Some(TransportEvent::Closed(_)) | None => return true,
                Some(_) => {}
            }
        }
    })
    .await;
    assert!(closed);
}

#[tokio::test]
async fn test_wrong_token_never_opens_offerer() {
    let (mut offerer, mut offerer_events) = transport();
    let (mut impostor, _impostor_events) = transport();

    let offer = offerer.create_offer().await.unwrap();
    offerer.set_local_description(offer).await.unwrap();
    let Some(TransportEvent::LocalCandidate(candidate)) = offerer_events.recv().await else {
        panic!("expected a local candidate");
    };

    let forged = SessionDescription::offer("localshare-tcp/1 0123456789abcdef");
    impostor.set_remote_description(forged).await.unwrap();
    impostor.add_ice_candidate(candidate).await.unwrap();

    let opened = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match offerer_events.recv().await {
                Some(TransportEvent::ChannelOpen(_)) => return,
                Some(_) => {}
                None => std::future::pending::<()>().await,
            }
        }
    })
    .await;
    assert!(opened.is_err());
}
