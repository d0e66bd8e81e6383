//! The LocalShare client.
//!
//! [`Client::spawn`] starts one event-loop task that owns every piece of
//! client state: the shared-file map, the session table, the transfer
//! coordinator and the download queue. Everything else talks to it through
//! channels:
//!
//! - the relay link task (websocket with reconnect)
//! - one driver task per peer session, owning that session's transport
//! - one task per outgoing file
//! - the [`ClientHandle`] held by the application
//!
//! A periodic sweep closes stale and idle sessions and aborts downloads that
//! stopped making progress.

mod relay_link;

pub use relay_link::RelayEvent;

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::file::{FileMetadata, SharedFiles};
use crate::protocol::{
    AdvertisedFile, ChannelMessage, ClientId, ControlMessage, RelayClientMessage,
    RelayServerMessage, SdpKind, Signal, TransferId,
};
use crate::queue::{DownloadQueue, DownloadRequest};
use crate::session::{
    spawn_driver, DriverEvent, OfferDecision, SessionAction, SessionDriver, SessionEvent,
    SessionTable, TaggedDriverEvent,
};
use crate::transfer::{
    send_file, ReceivedFile, SendOptions, TransferCoordinator, TransferDirection,
    TransferProgress,
};
use crate::transport::{PeerChannel, TcpTransportFactory, TransportFactory};

/// How often stale sessions and stalled downloads are checked.
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Something the application should know about.
#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// The relay assigned us an id
    Registered(ClientId),
    /// The relay connection dropped; reconnecting
    Disconnected,
    /// Files shared in our group
    Snapshot {
        /// Devices in the group, including us
        device_count: usize,
        /// Every advertised file
        files: Vec<AdvertisedFile>,
    },
    /// The download queue changed
    QueueStatus {
        /// Download in flight
        active: Option<DownloadRequest>,
        /// Requests waiting behind it
        pending: usize,
    },
    /// Bytes moved on a transfer
    Progress(TransferProgress),
    /// A download finished
    FileReceived(ReceivedFile),
    /// An upload finished
    FileSent {
        /// Transfer id
        transfer_id: TransferId,
        /// Receiving peer
        peer: ClientId,
        /// File name
        file_name: String,
        /// Bytes sent
        bytes: u64,
    },
    /// A transfer in either direction was aborted
    TransferAborted {
        /// Transfer id
        transfer_id: TransferId,
        /// Remote peer
        peer: ClientId,
        /// File name
        file_name: String,
        /// Human-readable reason
        reason: String,
    },
}

#[derive(Debug)]
enum ClientCommand {
    Share {
        paths: Vec<PathBuf>,
        reply: oneshot::Sender<Result<Vec<FileMetadata>>>,
    },
    StopSharing,
    Enqueue {
        owner: ClientId,
        file_name: String,
        reply: oneshot::Sender<(DownloadRequest, usize)>,
    },
    Shutdown,
}

#[derive(Debug)]
enum SendReport {
    Progress { id: TransferId, sent: u64 },
    Done { id: TransferId, result: Result<u64> },
}

/// Application-side handle to a running client.
#[derive(Debug)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<ClientCommand>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    task: JoinHandle<()>,
}

impl ClientHandle {
    /// Share files and directories.
    ///
    /// Returns the metadata of every file added.
    ///
    /// # Errors
    ///
    /// Returns an error if a path is missing, nothing shareable was found, or
    /// the client has shut down.
    pub async fn share(&self, paths: Vec<PathBuf>) -> Result<Vec<FileMetadata>> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Share { paths, reply })?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Stop sharing everything and cancel running uploads.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has shut down.
    pub fn stop_sharing(&self) -> Result<()> {
        self.send(ClientCommand::StopSharing)
    }

    /// Queue a download of `file_name` from `owner`.
    ///
    /// Returns the request and its position in the queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the client has shut down.
    pub async fn enqueue(
        &self,
        owner: ClientId,
        file_name: impl Into<String>,
    ) -> Result<(DownloadRequest, usize)> {
        let (reply, rx) = oneshot::channel();
        self.send(ClientCommand::Enqueue {
            owner,
            file_name: file_name.into(),
            reply,
        })?;
        rx.await.map_err(|_| Error::Shutdown)
    }

    /// Next event, or `None` once the client has stopped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Stop the client and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.commands.send(ClientCommand::Shutdown);
        let _ = self.task.await;
    }

    fn send(&self, command: ClientCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| Error::Shutdown)
    }
}

/// Entry point for starting clients.
#[derive(Debug)]
pub struct Client;

impl Client {
    /// Start a client using the bundled TCP transport.
    #[must_use]
    pub fn spawn(config: Config) -> ClientHandle {
        let factory = TcpTransportFactory::new(config.transfer.channel_capacity)
            .with_advertise_addr(config.client.advertise_addr);
        Self::spawn_with(config, factory)
    }

    /// Start a client with a custom transport.
    #[must_use]
    pub fn spawn_with<F: TransportFactory>(config: Config, factory: F) -> ClientHandle {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (relay_out_tx, relay_out_rx) = mpsc::unbounded_channel();
        let (relay_events_tx, relay_events_rx) = mpsc::unbounded_channel();
        let (driver_tx, driver_rx) = mpsc::unbounded_channel();
        let (send_tx, send_rx) = mpsc::unbounded_channel();

        let cancel = CancellationToken::new();
        let relay_task = relay_link::spawn_relay_link(
            config.client.relay_url.clone(),
            config.client.reconnect_backoff,
            relay_out_rx,
            relay_events_tx,
            cancel.clone(),
        );

        let event_loop = EventLoop {
            sessions: SessionTable::new(
                config.client.session_setup_timeout,
                config.client.session_idle_timeout,
            ),
            config,
            factory,
            client_id: None,
            local_ip: None,
            shared: SharedFiles::new(),
            drivers: HashMap::new(),
            channels: HashMap::new(),
            transfers: TransferCoordinator::new(),
            queue: DownloadQueue::new(),
            awaiting_channel: None,
            relay_out: relay_out_tx,
            driver_tx,
            send_tx,
            events: events_tx,
        };

        let task = tokio::spawn(async move {
            event_loop
                .run(commands_rx, relay_events_rx, driver_rx, send_rx)
                .await;
            cancel.cancel();
            let _ = relay_task.await;
        });

        ClientHandle {
            commands: commands_tx,
            events: events_rx,
            task,
        }
    }
}

struct DriverSlot {
    epoch: u64,
    driver: SessionDriver,
}

struct EventLoop<F: TransportFactory> {
    config: Config,
    factory: F,
    client_id: Option<ClientId>,
    local_ip: Option<IpAddr>,
    shared: SharedFiles,
    sessions: SessionTable,
    drivers: HashMap<ClientId, DriverSlot>,
    channels: HashMap<ClientId, PeerChannel>,
    transfers: TransferCoordinator,
    queue: DownloadQueue,
    /// Active download whose request waits for a channel to its owner
    awaiting_channel: Option<DownloadRequest>,
    relay_out: mpsc::UnboundedSender<RelayClientMessage>,
    driver_tx: mpsc::UnboundedSender<TaggedDriverEvent>,
    send_tx: mpsc::UnboundedSender<SendReport>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl<F: TransportFactory> EventLoop<F> {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<ClientCommand>,
        mut relay_events: mpsc::UnboundedReceiver<RelayEvent>,
        mut driver_events: mpsc::UnboundedReceiver<TaggedDriverEvent>,
        mut send_reports: mpsc::UnboundedReceiver<SendReport>,
    ) {
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    None | Some(ClientCommand::Shutdown) => break,
                    Some(command) => self.on_command(command),
                },
                event = relay_events.recv() => match event {
                    Some(event) => self.on_relay_event(event),
                    None => break,
                },
                Some(event) = driver_events.recv() => self.on_driver_event(event),
                Some(report) = send_reports.recv() => self.on_send_report(report),
                _ = sweep.tick() => self.sweep(Instant::now()),
            }
            self.process_queue(Instant::now());
        }

        tracing::debug!("Client shutting down");
        self.transfers.cancel_sends();
        for (_, slot) in self.drivers.drain() {
            slot.driver.close();
        }
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    fn emit_queue_status(&self) {
        self.emit(ClientEvent::QueueStatus {
            active: self.queue.active().cloned(),
            pending: self.queue.len(),
        });
    }

    fn relay(&self, message: RelayClientMessage) {
        let _ = self.relay_out.send(message);
    }

    fn on_command(&mut self, command: ClientCommand) {
        match command {
            ClientCommand::Share { paths, reply } => {
                let result = self.shared.add_paths(&paths);
                if let Ok(added) = &result {
                    tracing::info!("Sharing {} file(s)", added.len());
                    if self.client_id.is_some() {
                        self.relay(RelayClientMessage::Share {
                            files: added.clone(),
                        });
                    }
                }
                let _ = reply.send(result);
            }
            ClientCommand::StopSharing => {
                self.shared.clear();
                let cancelled = self.transfers.cancel_sends();
                tracing::info!("Stopped sharing ({} upload(s) cancelled)", cancelled);
                if self.client_id.is_some() {
                    self.relay(RelayClientMessage::StopSharing);
                }
            }
            ClientCommand::Enqueue {
                owner,
                file_name,
                reply,
            } => {
                let queued = self.queue.enqueue(owner, file_name, Instant::now());
                tracing::info!(
                    "Queued '{}' from {} at position {}",
                    queued.0.file_name,
                    queued.0.owner,
                    queued.1
                );
                let _ = reply.send(queued);
                self.emit_queue_status();
            }
            ClientCommand::Shutdown => {}
        }
    }

    fn on_relay_event(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Connected { local_ip } => {
                self.local_ip = local_ip;
                self.relay(RelayClientMessage::Register);
            }
            RelayEvent::Disconnected => {
                self.client_id = None;
                self.emit(ClientEvent::Disconnected);
            }
            RelayEvent::Message(RelayServerMessage::Register { client_id }) => {
                tracing::info!("Registered with relay as {}", client_id);
                self.client_id = Some(client_id.clone());
                if !self.shared.is_empty() {
                    self.relay(RelayClientMessage::Share {
                        files: self.shared.metadata().to_vec(),
                    });
                }
                self.emit(ClientEvent::Registered(client_id));
            }
            RelayEvent::Message(RelayServerMessage::Update {
                device_count,
                shared_files,
            }) => {
                self.emit(ClientEvent::Snapshot {
                    device_count,
                    files: shared_files,
                });
            }
            RelayEvent::Message(RelayServerMessage::Signal { from_id, signal }) => {
                self.on_signal(from_id, signal);
            }
        }
    }

    fn on_signal(&mut self, from: ClientId, signal: serde_json::Value) {
        let signal = match Signal::from_value(signal) {
            Ok(signal) => signal,
            Err(e) => {
                tracing::debug!("Dropping signal from {}: {}", from, e);
                return;
            }
        };

        let event = match signal {
            Signal::Description(description) if description.kind == SdpKind::Offer => {
                let now = Instant::now();
                match self.sessions.classify_offer(&from, now) {
                    OfferDecision::Reject => {
                        tracing::info!("Ignoring offer from {}: session already active", from);
                        return;
                    }
                    OfferDecision::Supersede => {
                        self.close_session(&from, "superseded by a new offer");
                        self.open_session(&from, now);
                    }
                    OfferDecision::Accept => self.open_session(&from, now),
                }
                SessionEvent::RemoteOffer(description)
            }
            Signal::Description(description) => SessionEvent::RemoteAnswer(description),
            Signal::Candidate(candidate) => SessionEvent::RemoteCandidate(candidate),
        };
        self.step(&from, event);
    }

    fn open_session(&mut self, peer: &ClientId, now: Instant) {
        let (session, previous) = self.sessions.open(peer.clone(), now);
        let epoch = session.epoch();
        if previous.is_some() {
            if let Some(old) = self.drivers.remove(peer) {
                old.driver.close();
            }
            self.channels.remove(peer);
        }

        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let transport = self.factory.create(transport_tx, self.local_ip);
        let driver = spawn_driver(
            peer.clone(),
            epoch,
            transport,
            transport_rx,
            self.driver_tx.clone(),
        );
        self.drivers.insert(peer.clone(), DriverSlot { epoch, driver });
        tracing::debug!("Opened session {} with {}", epoch, peer);
    }

    fn step(&mut self, peer: &ClientId, event: SessionEvent) {
        let reason = match &event {
            SessionEvent::Failed(reason) => reason.clone(),
            _ => "session closed".to_string(),
        };
        let actions = self.sessions.handle(peer, event);
        if actions.is_empty() {
            return;
        }

        let closing = actions.contains(&SessionAction::CloseTransport);
        if let Some(slot) = self.drivers.get(peer) {
            slot.driver.execute(actions);
        }
        if closing {
            self.teardown(peer, &reason);
        }
    }

    /// Drive the session with `peer` to `Closed` and release everything it held.
    fn close_session(&mut self, peer: &ClientId, reason: &str) {
        if self.sessions.get(peer).is_some() {
            self.step(peer, SessionEvent::Failed(reason.to_string()));
        }
        self.teardown(peer, reason);
    }

    fn teardown(&mut self, peer: &ClientId, reason: &str) {
        self.sessions.remove(peer);
        if let Some(slot) = self.drivers.remove(peer) {
            slot.driver.close();
        }
        self.channels.remove(peer);

        let mut queue_changed = false;
        for record in self.transfers.abort_peer(peer) {
            queue_changed |= self.queue.finish(record.id).is_some();
            self.emit(ClientEvent::TransferAborted {
                transfer_id: record.id,
                peer: record.peer,
                file_name: record.file_name,
                reason: reason.to_string(),
            });
        }
        if self
            .awaiting_channel
            .as_ref()
            .is_some_and(|r| r.owner == *peer)
        {
            self.awaiting_channel = None;
        }
        queue_changed |= self.queue.abort_owner(peer).is_some();
        if queue_changed {
            self.emit_queue_status();
        }
    }

    fn on_driver_event(&mut self, tagged: TaggedDriverEvent) {
        let TaggedDriverEvent { peer, epoch, event } = tagged;
        let current = self.drivers.get(&peer).map(|slot| slot.epoch);
        if current != Some(epoch) {
            tracing::debug!("Dropping event from old session {} with {}", epoch, peer);
            return;
        }

        match event {
            DriverEvent::Signal(signal) => match signal.to_value() {
                Ok(signal) => self.relay(RelayClientMessage::Signal {
                    target_id: peer,
                    signal,
                }),
                Err(e) => tracing::warn!("Failed to encode signal: {}", e),
            },
            DriverEvent::RemoteApplied => self.step(&peer, SessionEvent::RemoteApplied),
            DriverEvent::Failed(reason) => self.step(&peer, SessionEvent::Failed(reason)),
            DriverEvent::ChannelOpen(channel) => {
                self.channels.insert(peer.clone(), channel.clone());
                self.step(&peer, SessionEvent::ChannelOpen);
                if let Some(session) = self.sessions.get_mut(&peer) {
                    session.touch(Instant::now());
                }
                if self
                    .awaiting_channel
                    .as_ref()
                    .is_some_and(|r| r.owner == peer)
                {
                    if let Some(request) = self.awaiting_channel.take() {
                        send_request(channel, &request);
                    }
                }
            }
            DriverEvent::Message(message) => {
                if let Some(session) = self.sessions.get_mut(&peer) {
                    session.touch(Instant::now());
                }
                self.on_channel_message(&peer, message);
            }
            DriverEvent::Closed(reason) => {
                let event = match reason {
                    Some(reason) => SessionEvent::Failed(reason),
                    None => SessionEvent::Close,
                };
                self.step(&peer, event);
            }
        }
    }

    fn on_channel_message(&mut self, peer: &ClientId, message: ChannelMessage) {
        let now = Instant::now();
        match message {
            ChannelMessage::Control(ControlMessage::Request {
                file_name,
                transfer_id,
            }) => self.serve_request(peer, file_name, transfer_id, now),
            ChannelMessage::Control(ControlMessage::FileSize {
                file_name,
                transfer_id,
                size,
            }) => {
                if let Some(progress) =
                    self.transfers
                        .on_file_size(peer, transfer_id, file_name, size, now)
                {
                    self.queue.touch(transfer_id, now);
                    self.emit(ClientEvent::Progress(progress));
                }
            }
            ChannelMessage::Chunk(chunk) => {
                let id = chunk.transfer_id;
                if let Some(progress) = self.transfers.on_chunk(peer, chunk, now) {
                    self.queue.touch(id, now);
                    self.emit(ClientEvent::Progress(progress));
                }
            }
            ChannelMessage::Control(ControlMessage::End { transfer_id }) => {
                let file_name = self
                    .transfers
                    .get(transfer_id)
                    .map(|r| r.file_name.clone())
                    .unwrap_or_default();
                match self.transfers.on_end(peer, transfer_id) {
                    Ok(file) => self.emit(ClientEvent::FileReceived(file)),
                    Err(Error::UnknownTransfer(_)) => {
                        tracing::warn!("End for unknown transfer {}", transfer_id);
                    }
                    Err(e) => {
                        tracing::warn!("Transfer {} failed: {}", transfer_id, e);
                        self.emit(ClientEvent::TransferAborted {
                            transfer_id,
                            peer: peer.clone(),
                            file_name,
                            reason: e.to_string(),
                        });
                    }
                }
                if self.queue.finish(transfer_id).is_some() {
                    self.emit_queue_status();
                }
            }
            ChannelMessage::Control(ControlMessage::Stop { transfer_id }) => {
                if let Some(record) = self.transfers.on_stop(peer, transfer_id) {
                    self.emit(ClientEvent::TransferAborted {
                        transfer_id,
                        peer: record.peer,
                        file_name: record.file_name,
                        reason: "stopped by sender".to_string(),
                    });
                }
                if self.queue.finish(transfer_id).is_some() {
                    self.emit_queue_status();
                }
            }
        }
    }

    fn serve_request(&mut self, peer: &ClientId, file_name: String, id: TransferId, now: Instant) {
        let Some(path) = self.shared.path_of(&file_name).map(PathBuf::from) else {
            tracing::debug!("{} requested '{}' which is not shared", peer, file_name);
            return;
        };
        let Some(channel) = self.channels.get(peer).cloned() else {
            return;
        };
        let size = self
            .shared
            .metadata()
            .iter()
            .find(|m| m.name == file_name)
            .map_or(0, |m| m.size);

        let Some(cancel) = self
            .transfers
            .start_send(peer.clone(), id, file_name.clone(), size, now)
        else {
            return;
        };
        tracing::info!("Sending '{}' to {}", file_name, peer);
        let options = SendOptions {
            chunk_size: self.config.transfer.chunk_size,
            pause: self.config.transfer.chunk_pause,
        };
        let reports = self.send_tx.clone();

        tokio::spawn(async move {
            let result = match tokio::fs::read(&path).await {
                Ok(data) => {
                    let progress = reports.clone();
                    send_file(&channel, id, &file_name, &data, options, &cancel, move |sent| {
                        let _ = progress.send(SendReport::Progress { id, sent });
                    })
                    .await
                }
                Err(e) => Err(Error::Io(e)),
            };
            let _ = reports.send(SendReport::Done { id, result });
        });
    }

    fn on_send_report(&mut self, report: SendReport) {
        let now = Instant::now();
        match report {
            SendReport::Progress { id, sent } => {
                if let Some(progress) = self.transfers.on_sent(id, sent, now) {
                    if let Some(session) = self.sessions.get_mut(&progress.peer) {
                        session.touch(now);
                    }
                    self.emit(ClientEvent::Progress(progress));
                }
            }
            SendReport::Done { id, result } => {
                let Some(record) = self.transfers.finish_send(id, &result) else {
                    return;
                };
                match result {
                    Ok(bytes) => self.emit(ClientEvent::FileSent {
                        transfer_id: id,
                        peer: record.peer,
                        file_name: record.file_name,
                        bytes,
                    }),
                    Err(e) => self.emit(ClientEvent::TransferAborted {
                        transfer_id: id,
                        peer: record.peer,
                        file_name: record.file_name,
                        reason: e.to_string(),
                    }),
                }
            }
        }
    }

    fn process_queue(&mut self, now: Instant) {
        let Some(request) = self.queue.process_next(now) else {
            return;
        };
        self.transfers.expect(
            request.transfer_id,
            request.owner.clone(),
            request.file_name.clone(),
            now,
        );
        self.emit_queue_status();

        let open_channel = self
            .channels
            .get(&request.owner)
            .filter(|c| c.is_open())
            .cloned();
        if let Some(channel) = open_channel {
            send_request(channel, &request);
            return;
        }

        let owner = request.owner.clone();
        self.awaiting_channel = Some(request);
        if !self.sessions.is_active(&owner) {
            tracing::debug!("Connecting to {}", owner);
            self.open_session(&owner, now);
            self.step(&owner, SessionEvent::Initiate);
        }
    }

    fn sweep(&mut self, now: Instant) {
        let transfers = &self.transfers;
        let awaiting = self.awaiting_channel.as_ref();
        let expired = self.sessions.expired(now, |peer| {
            transfers.has_transfers(peer) || awaiting.is_some_and(|r| r.owner == *peer)
        });
        for (peer, reason) in expired {
            tracing::info!("Closing session with {}: {:?}", peer, reason);
            self.close_session(&peer, "session timed out");
        }

        let timeout = self.config.client.download_timeout;
        let mut stalled = self.transfers.stalled_receives(now, timeout);
        if let Some(id) = self.queue.timed_out(now, timeout) {
            if !stalled.contains(&id) {
                stalled.push(id);
            }
        }
        for id in stalled {
            self.abort_download(id, "no progress");
        }
    }

    fn abort_download(&mut self, id: TransferId, reason: &str) {
        let record = self.transfers.abort(id);
        let request = self.queue.finish(id);
        if self
            .awaiting_channel
            .as_ref()
            .is_some_and(|r| r.transfer_id == id)
        {
            self.awaiting_channel = None;
        }

        let (peer, file_name) = match (record, &request) {
            (Some(record), _) if record.direction == TransferDirection::Receive => {
                (record.peer, record.file_name)
            }
            (_, Some(request)) => (request.owner.clone(), request.file_name.clone()),
            _ => return,
        };
        tracing::warn!("Download of '{}' from {} aborted: {}", file_name, peer, reason);
        self.emit(ClientEvent::TransferAborted {
            transfer_id: id,
            peer,
            file_name,
            reason: reason.to_string(),
        });
        if request.is_some() {
            self.emit_queue_status();
        }
    }
}

fn send_request(channel: PeerChannel, request: &DownloadRequest) {
    tracing::info!("Requesting '{}' from {}", request.file_name, request.owner);
    let message = ControlMessage::Request {
        file_name: request.file_name.clone(),
        transfer_id: request.transfer_id,
    };
    tokio::spawn(async move {
        if let Err(e) = channel.send(message).await {
            tracing::warn!("Failed to send request: {}", e);
        }
    });
}
