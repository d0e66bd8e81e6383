//! Direct TCP transport for peers on the same LAN.
//!
//! The offering side binds a listener and advertises it as a `tcp <ip> <port>`
//! candidate; its offer carries a random session token. The answering side
//! echoes the token in its answer, dials the candidates it receives and
//! presents the token in a `Hello` frame. The first connection that gets
//! through the handshake becomes the channel, every other one is dropped.
//!
//! Once open, channel messages travel as LSHR frames (see
//! [`crate::protocol`]).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::{PeerChannel, Transport, TransportEvent, TransportFactory};
use crate::error::{Error, Result};
use crate::protocol::{
    read_frame, read_frame_with_timeout, write_frame, Candidate, ChannelMessage, FrameType,
    SdpKind, SessionDescription,
};

const SDP_PREFIX: &str = "localshare-tcp/1";

/// How long an accepted connection has to present the session token.
const HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// How long dialing one candidate may take.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Configure TCP keep-alive on a channel socket.
///
/// Probing starts after 10 seconds of idle time and repeats every 5 seconds,
/// so a vanished peer is noticed even when no transfer is running.
fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on channel socket");
    Ok(())
}

/// Creates [`TcpTransport`]s.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    advertise_addr: Option<IpAddr>,
    channel_capacity: usize,
}

impl TcpTransportFactory {
    /// Factory whose channels queue up to `channel_capacity` outgoing messages.
    #[must_use]
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            advertise_addr: None,
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Always advertise `addr` in candidates instead of the detected address.
    #[must_use]
    pub fn with_advertise_addr(mut self, addr: Option<IpAddr>) -> Self {
        self.advertise_addr = addr;
        self
    }
}

impl TransportFactory for TcpTransportFactory {
    type Transport = TcpTransport;

    fn create(
        &self,
        events: mpsc::UnboundedSender<TransportEvent>,
        local_ip: Option<IpAddr>,
    ) -> TcpTransport {
        let advertise_ip = self
            .advertise_addr
            .or(local_ip)
            .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));
        TcpTransport::new(events, advertise_ip, self.channel_capacity)
    }
}

/// Shared by the tasks racing to become the channel.
#[derive(Clone)]
struct ChannelContext {
    events: mpsc::UnboundedSender<TransportEvent>,
    claimed: Arc<AtomicBool>,
    cancel: CancellationToken,
    channel_capacity: usize,
}

impl ChannelContext {
    /// Reserve the channel slot. Only the first caller wins.
    fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::SeqCst)
    }

    fn fail(&self, reason: String) {
        let _ = self.events.send(TransportEvent::Closed(Some(reason)));
    }

    fn open(&self, stream: TcpStream) {
        if let Err(e) = configure_tcp_keepalive(&stream) {
            tracing::warn!("Failed to enable TCP keep-alive: {}", e);
        }
        let peer = stream.peer_addr().ok();
        let (mut reader, mut writer) = stream.into_split();
        let (channel, mut outgoing) = PeerChannel::pair(self.channel_capacity);

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => break,
                    message = outgoing.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let result = match message.to_frame() {
                    Ok((frame_type, payload)) => write_frame(&mut writer, frame_type, &payload).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    tracing::debug!("Channel write failed: {}", e);
                    break;
                }
            }
            let _ = writer.shutdown().await;
        });

        tracing::debug!("TCP channel open with {:?}", peer);
        if self.events.send(TransportEvent::ChannelOpen(channel)).is_err() {
            return;
        }

        let events = self.events.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let reason = loop {
                let frame = tokio::select! {
                    () = cancel.cancelled() => return,
                    frame = read_frame(&mut reader) => frame,
                };
                match frame {
                    Ok((header, payload)) => {
                        match ChannelMessage::from_frame(header.frame_type, &payload) {
                            Ok(message) => {
                                if events.send(TransportEvent::Message(message)).is_err() {
                                    return;
                                }
                            }
                            Err(e) => break Some(e.to_string()),
                        }
                    }
                    Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                        break None;
                    }
                    Err(e) => break Some(e.to_string()),
                }
            };
            let _ = events.send(TransportEvent::Closed(reason));
        });
    }
}

/// One direct TCP connection attempt to a peer.
pub struct TcpTransport {
    ctx: ChannelContext,
    advertise_ip: IpAddr,
    role: Option<SdpKind>,
    token: Option<String>,
    listener: Option<TcpListener>,
    remote_applied: bool,
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("advertise_ip", &self.advertise_ip)
            .field("role", &self.role)
            .field("remote_applied", &self.remote_applied)
            .finish_non_exhaustive()
    }
}

impl TcpTransport {
    /// Create a transport advertising `advertise_ip`.
    #[must_use]
    pub fn new(
        events: mpsc::UnboundedSender<TransportEvent>,
        advertise_ip: IpAddr,
        channel_capacity: usize,
    ) -> Self {
        Self {
            ctx: ChannelContext {
                events,
                claimed: Arc::new(AtomicBool::new(false)),
                cancel: CancellationToken::new(),
                channel_capacity: channel_capacity.max(1),
            },
            advertise_ip,
            role: None,
            token: None,
            listener: None,
            remote_applied: false,
        }
    }

    fn expect_token(&self, description: &SessionDescription) -> Result<String> {
        let token = parse_token(&description.sdp)?;
        match &self.token {
            Some(expected) if *expected == token => Ok(token),
            Some(_) => Err(Error::InvalidSignal("session token mismatch".to_string())),
            None => Err(Error::InvalidSignal("no session token negotiated".to_string())),
        }
    }

    fn describe(&self, kind: SdpKind) -> Result<SessionDescription> {
        let token = self
            .token
            .as_ref()
            .ok_or_else(|| Error::InvalidSignal("no session token negotiated".to_string()))?;
        Ok(SessionDescription {
            kind,
            sdp: format!("{SDP_PREFIX} {token}"),
        })
    }
}

impl Transport for TcpTransport {
    async fn create_offer(&mut self) -> Result<SessionDescription> {
        if self.role.is_some() || self.token.is_some() {
            return Err(Error::Transport("offer after negotiation started".to_string()));
        }
        let bind_ip = match self.advertise_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        let listener = TcpListener::bind(SocketAddr::new(bind_ip, 0)).await?;
        self.listener = Some(listener);
        self.token = Some(format!("{:032x}", rand::random::<u128>()));
        self.describe(SdpKind::Offer)
    }

    async fn create_answer(&mut self) -> Result<SessionDescription> {
        if !self.remote_applied || self.listener.is_some() {
            return Err(Error::Transport("answer without a remote offer".to_string()));
        }
        self.describe(SdpKind::Answer)
    }

    async fn set_local_description(&mut self, description: SessionDescription) -> Result<()> {
        let token = self.expect_token(&description)?;
        self.role = Some(description.kind);

        if description.kind == SdpKind::Offer {
            let listener = self
                .listener
                .take()
                .ok_or_else(|| Error::Transport("offer was not created here".to_string()))?;
            let port = listener.local_addr()?.port();
            let candidate = Candidate::new(format!("tcp {} {}", self.advertise_ip, port));
            let _ = self.ctx.events.send(TransportEvent::LocalCandidate(candidate));
            tokio::spawn(accept_loop(listener, token, self.ctx.clone()));
        }
        Ok(())
    }

    async fn set_remote_description(&mut self, description: SessionDescription) -> Result<()> {
        match description.kind {
            SdpKind::Offer => {
                if self.token.is_some() {
                    return Err(Error::InvalidSignal(
                        "remote offer after negotiation started".to_string(),
                    ));
                }
                self.token = Some(parse_token(&description.sdp)?);
            }
            SdpKind::Answer => {
                self.expect_token(&description)?;
            }
        }
        self.remote_applied = true;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: Candidate) -> Result<()> {
        if self.role == Some(SdpKind::Offer) {
            tracing::debug!("Offering side ignores remote candidate {}", candidate.candidate);
            return Ok(());
        }
        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::InvalidSignal("candidate before remote offer".to_string()))?;
        let addr = parse_candidate(&candidate.candidate)?;
        tokio::spawn(dial(addr, token, self.ctx.clone()));
        Ok(())
    }

    async fn close(&mut self) {
        self.ctx.cancel.cancel();
        self.listener = None;
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.ctx.cancel.cancel();
    }
}

async fn accept_loop(listener: TcpListener, token: String, ctx: ChannelContext) {
    loop {
        let accepted = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            accepted = listener.accept() => accepted,
        };
        let (mut stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                ctx.fail(format!("accept failed: {e}"));
                return;
            }
        };

        let hello = tokio::select! {
            () = ctx.cancel.cancelled() => return,
            hello = read_frame_with_timeout(&mut stream, HELLO_TIMEOUT) => hello,
        };
        match hello {
            Ok((header, payload))
                if header.frame_type == FrameType::Hello && payload == token.as_bytes() =>
            {
                if ctx.claim() {
                    ctx.open(stream);
                }
                return;
            }
            Ok(_) => tracing::warn!("Rejected connection from {} with a bad token", peer),
            Err(e) => tracing::debug!("Handshake with {} failed: {}", peer, e),
        }
    }
}

async fn dial(addr: SocketAddr, token: String, ctx: ChannelContext) {
    let connected = tokio::select! {
        () = ctx.cancel.cancelled() => return,
        connected = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)) => connected,
    };
    let mut stream = match connected {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!("Candidate {} unreachable: {}", addr, e);
            return;
        }
        Err(_) => {
            tracing::debug!("Candidate {} timed out", addr);
            return;
        }
    };

    if !ctx.claim() {
        return;
    }
    if let Err(e) = write_frame(&mut stream, FrameType::Hello, token.as_bytes()).await {
        ctx.fail(format!("handshake with {addr} failed: {e}"));
        return;
    }
    ctx.open(stream);
}

fn parse_token(sdp: &str) -> Result<String> {
    sdp.strip_prefix(SDP_PREFIX)
        .map(str::trim)
        .filter(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidSignal(format!("not a {SDP_PREFIX} description")))
}

fn parse_candidate(line: &str) -> Result<SocketAddr> {
    let mut parts = line.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("tcp"), Some(ip), Some(port), None) => {
            let ip: IpAddr = ip
                .parse()
                .map_err(|_| Error::InvalidSignal(format!("bad candidate address: {ip}")))?;
            let port: u16 = port
                .parse()
                .map_err(|_| Error::InvalidSignal(format!("bad candidate port: {port}")))?;
            Ok(SocketAddr::new(ip, port))
        }
        _ => Err(Error::InvalidSignal(format!("unsupported candidate: {line}"))),
    }
}
