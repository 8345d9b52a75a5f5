//! Single-writer authority over the session registry and the room table.
//!
//! Per-connection readers publish into the two queues consumed here; all
//! room mutations and all post-accept socket writes happen on this one
//! task, which is the concurrency discipline that replaces a lock on the
//! room table.

use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use anyhow::{Context, Result, bail};
use codec::{
    COMMAND_ADB_TRANSPORT, COMMAND_CONNECT, COMMAND_CREATE_ROOM, COMMAND_JOIN_ROOM,
    COMMAND_RECONNECT, COMMAND_RESPONSE_MASK, ERROR_ALREADY_IN_ROOM, ERROR_FULL,
    ERROR_INVALID_PAYLOAD, ERROR_NO_PARTICIPANT, ERROR_PROTOCOL_NOT_SUPPORTED,
    ERROR_ROOM_NOT_FOUND, ERROR_UNKNOWN, PROTOCOL_VERSION,
    frame::TransportFrame,
    payload::{ConnectResponsePayload, ConnectRoomPayload, CreateRoomResponsePayload, ErrorPayload},
    pool::TransportMessagePool,
};
use service::{
    generate_id_with,
    rooms::{Departure, RoomTable},
    session::{SessionId, SessionState},
};
use tokio::{io::AsyncWriteExt, net::tcp::OwnedWriteHalf, sync::mpsc::Receiver};
use tokio_util::sync::CancellationToken;

const JOIN_ROOM_RESPONSE: u32 = COMMAND_JOIN_ROOM | COMMAND_RESPONSE_MASK;

pub enum ClientMessage {
    /// A freshly accepted connection handing its write half over.
    Accepted {
        id: SessionId,
        writer: OwnedWriteHalf,
        cancel: CancellationToken,
    },
    Frame {
        id: SessionId,
        frame: TransportFrame,
    },
    /// The reader hit malformed input; answer with an error and close.
    ProtocolError {
        id: SessionId,
        command: u32,
    },
}

struct Session {
    writer: OwnedWriteHalf,
    cancel: CancellationToken,
    state: SessionState,
    client_id: Option<String>,
}

pub struct Dispatcher {
    pool: Arc<TransportMessagePool>,
    sessions: HashMap<SessionId, Session>,
    rooms: RoomTable,
    // disconnects that arrived on their own queue before the session's
    // `Accepted` registration; session ids are monotonic, so anything
    // above the registration watermark is early rather than stale
    early_disconnects: HashSet<SessionId>,
    last_registered: u64,
}

impl Dispatcher {
    pub fn new(pool: Arc<TransportMessagePool>) -> Self {
        Self {
            pool,
            sessions: HashMap::new(),
            rooms: RoomTable::new(),
            early_disconnects: HashSet::new(),
            last_registered: 0,
        }
    }

    /// Serve until cancellation or until both queues close. An `Err`
    /// means an invariant breach (id space exhaustion); the caller is
    /// expected to abort the process, not to keep serving.
    pub async fn run(
        mut self,
        mut messages: Receiver<ClientMessage>,
        mut disconnects: Receiver<SessionId>,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                message = messages.recv() => match message {
                    Some(message) => self.handle_message(message).await?,
                    None => break,
                },
                disconnected = disconnects.recv() => match disconnected {
                    Some(id) => self.handle_disconnect(id).await,
                    None => break,
                },
            }
        }

        // bounded drain: hand queued frames back to the pool, then close
        // every remaining socket once
        while let Ok(message) = messages.try_recv() {
            if let ClientMessage::Frame { frame, .. } = message {
                self.pool.release(frame);
            }
        }
        let remaining: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in remaining {
            self.close_session(id).await;
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Accepted { id, writer, cancel } => {
                self.last_registered = id.0;
                if self.early_disconnects.remove(&id) {
                    // the peer hung up before the registration landed
                    let mut writer = writer;
                    cancel.cancel();
                    let _ = writer.shutdown().await;
                    return Ok(());
                }
                self.sessions.insert(
                    id,
                    Session {
                        writer,
                        cancel,
                        state: SessionState::Handshaking,
                        client_id: None,
                    },
                );
                Ok(())
            }
            ClientMessage::Frame { id, frame } => self.handle_frame(id, frame).await,
            ClientMessage::ProtocolError { id, command } => {
                let _ = self
                    .send_error(id, command, ERROR_UNKNOWN, "Malformed frame")
                    .await;
                self.destroy_session(id).await;
                Ok(())
            }
        }
    }

    async fn handle_frame(&mut self, id: SessionId, frame: TransportFrame) -> Result<()> {
        if !self.sessions.contains_key(&id) {
            // torn down while the frame sat in the queue
            self.pool.release(frame);
            return Ok(());
        }
        let result = match frame.command() {
            COMMAND_CONNECT => self.handle_connect(id, &frame).await,
            COMMAND_RECONNECT => self.handle_reconnect(id).await,
            COMMAND_CREATE_ROOM => self.handle_create_room(id).await,
            COMMAND_JOIN_ROOM => self.handle_join_room(id, &frame).await,
            JOIN_ROOM_RESPONSE => self.handle_join_room_response(id, &frame).await,
            COMMAND_ADB_TRANSPORT => self.handle_adb_transport(id, &frame).await,
            command => {
                log::warn!("unhandled command: session={}, command={:#06x}", id, command);
                let _ = self
                    .send_error(id, command, ERROR_UNKNOWN, "Unknown command")
                    .await;
                self.destroy_session(id).await;
                Ok(())
            }
        };
        self.pool.release(frame);
        result
    }

    async fn handle_connect(&mut self, id: SessionId, frame: &TransportFrame) -> Result<()> {
        if self.state_of(id) != Some(SessionState::Handshaking) {
            let _ = self
                .send_error(id, COMMAND_CONNECT, ERROR_UNKNOWN, "Connect is only valid once")
                .await;
            self.destroy_session(id).await;
            return Ok(());
        }

        let payload = match frame.get_connect() {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("invalid connect payload: session={}, error={}", id, err);
                let _ = self
                    .send_error(id, COMMAND_CONNECT, ERROR_INVALID_PAYLOAD, "Invalid connect payload")
                    .await;
                self.destroy_session(id).await;
                return Ok(());
            }
        };

        if payload.protocol_version != PROTOCOL_VERSION {
            log::warn!(
                "protocol version not supported: session={}, transporter={}, client={}",
                id,
                PROTOCOL_VERSION,
                payload.protocol_version
            );
            let message = format!(
                "Protocol version mismatch, transporter: {}, client: {}",
                PROTOCOL_VERSION, payload.protocol_version
            );
            let _ = self
                .send_error(id, COMMAND_CONNECT, ERROR_PROTOCOL_NOT_SUPPORTED, &message)
                .await;
            self.destroy_session(id).await;
            return Ok(());
        }

        let client_id = match generate_id_with(|candidate| {
            self.sessions
                .values()
                .any(|session| session.client_id.as_deref() == Some(candidate))
        }) {
            Some(client_id) => client_id,
            None => {
                // invariant breach, takes the whole transporter down
                self.destroy_session(id).await;
                bail!("client id space exhausted");
            }
        };

        let mut response = self.pool.obtain();
        response.set_response_command(COMMAND_CONNECT);
        let sent = match response.set_connect_response(&ConnectResponsePayload {
            client_id: client_id.clone(),
        }) {
            Ok(()) => self.write_frame(id, &response).await,
            Err(err) => Err(err),
        };
        self.pool.release(response);

        if let Err(err) = sent {
            log::error!("connect response failed: session={}, error={}", id, err);
            self.destroy_session(id).await;
            return Ok(());
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.client_id = Some(client_id.clone());
            session.state = SessionState::Ready;
        }
        log::info!("client connected: session={}, client={}", id, client_id);
        Ok(())
    }

    /// Reserved for session resume; never silently accepted.
    async fn handle_reconnect(&mut self, id: SessionId) -> Result<()> {
        log::warn!("reconnect is not supported: session={}", id);
        let _ = self
            .send_error(id, COMMAND_RECONNECT, ERROR_UNKNOWN, "Reconnect is not supported")
            .await;
        self.destroy_session(id).await;
        Ok(())
    }

    async fn handle_create_room(&mut self, id: SessionId) -> Result<()> {
        let state = match self.state_of(id) {
            Some(state) => state,
            None => return Ok(()),
        };
        if state.is_in_room() {
            log::warn!("create room refused, already in a room: session={}", id);
            // the session stays open
            if self
                .send_error(id, COMMAND_CREATE_ROOM, ERROR_ALREADY_IN_ROOM, "You already occupy a room")
                .await
                .is_err()
            {
                self.destroy_session(id).await;
            }
            return Ok(());
        }
        if state != SessionState::Ready {
            let _ = self
                .send_error(id, COMMAND_CREATE_ROOM, ERROR_UNKNOWN, "Handshake first")
                .await;
            self.destroy_session(id).await;
            return Ok(());
        }

        let room_id = match self.rooms.create(id) {
            Ok(room) => room.room_id.clone(),
            Err(err) => {
                // invariant breach, takes the whole transporter down
                self.destroy_session(id).await;
                return Err(err).context("room id space exhausted");
            }
        };

        let mut response = self.pool.obtain();
        response.set_response_command(COMMAND_CREATE_ROOM);
        let sent = match response.set_create_room_response(&CreateRoomResponsePayload {
            room_id: room_id.clone(),
        }) {
            Ok(()) => self.write_frame(id, &response).await,
            Err(err) => Err(err),
        };
        self.pool.release(response);

        if let Err(err) = sent {
            log::error!(
                "create room response failed: session={}, room={}, error={}",
                id,
                room_id,
                err
            );
            // owner teardown removes the just-created room
            self.destroy_session(id).await;
            return Ok(());
        }

        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = SessionState::InRoomAsOwner;
        }
        log::info!("room created: room={}, owner={}", room_id, id);
        Ok(())
    }

    async fn handle_join_room(&mut self, id: SessionId, frame: &TransportFrame) -> Result<()> {
        let state = match self.state_of(id) {
            Some(state) => state,
            None => return Ok(()),
        };
        if state.is_in_room() {
            log::warn!("join room refused, already in a room: session={}", id);
            if self
                .send_error(id, COMMAND_JOIN_ROOM, ERROR_ALREADY_IN_ROOM, "You already occupy a room")
                .await
                .is_err()
            {
                self.destroy_session(id).await;
            }
            return Ok(());
        }
        if state != SessionState::Ready {
            let _ = self
                .send_error(id, COMMAND_JOIN_ROOM, ERROR_UNKNOWN, "Handshake first")
                .await;
            self.destroy_session(id).await;
            return Ok(());
        }

        let payload = match frame.get_connect_room() {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("invalid join room payload: session={}, error={}", id, err);
                let _ = self
                    .send_error(id, COMMAND_JOIN_ROOM, ERROR_INVALID_PAYLOAD, "Invalid join room payload")
                    .await;
                self.destroy_session(id).await;
                return Ok(());
            }
        };

        let owner = match self.rooms.get(&payload.room_id) {
            None => {
                log::warn!(
                    "join room failed, room not found: session={}, room={}",
                    id,
                    payload.room_id
                );
                let message = format!("Room not found with this id: {}", payload.room_id);
                if self
                    .send_error(id, COMMAND_JOIN_ROOM, ERROR_ROOM_NOT_FOUND, &message)
                    .await
                    .is_err()
                {
                    self.destroy_session(id).await;
                }
                return Ok(());
            }
            Some(room) if room.guest.is_some() => {
                log::warn!(
                    "join room failed, room is full: session={}, room={}",
                    id,
                    payload.room_id
                );
                if self
                    .send_error(id, COMMAND_JOIN_ROOM, ERROR_FULL, "The room is already occupied")
                    .await
                    .is_err()
                {
                    self.destroy_session(id).await;
                }
                return Ok(());
            }
            Some(room) => room.owner,
        };

        self.rooms.set_guest(&payload.room_id, id);
        let client_id = self
            .sessions
            .get(&id)
            .and_then(|session| session.client_id.clone())
            .unwrap_or_default();
        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = SessionState::InRoomAsGuest;
        }
        log::info!(
            "join room requested: room={}, guest={}, client={}",
            payload.room_id,
            id,
            client_id
        );

        // direct, non-response notification to the room owner
        let mut request = self.pool.obtain();
        request.set_direct_command(COMMAND_JOIN_ROOM);
        let sent = match request.set_connect_room(&ConnectRoomPayload {
            room_id: payload.room_id.clone(),
            client_id,
        }) {
            Ok(()) => self.write_frame(owner, &request).await,
            Err(err) => Err(err),
        };
        self.pool.release(request);

        if let Err(err) = sent {
            log::error!(
                "join request could not reach the owner: room={}, error={}",
                payload.room_id,
                err
            );
            let _ = self
                .send_error(
                    id,
                    COMMAND_JOIN_ROOM,
                    ERROR_UNKNOWN,
                    "Couldn't send the join request to the room owner, closing down the room",
                )
                .await;
            self.destroy_room(&payload.room_id).await;
        }
        Ok(())
    }

    async fn handle_join_room_response(&mut self, id: SessionId, frame: &TransportFrame) -> Result<()> {
        let (room_id, guest) = match self.rooms.owned_by(id) {
            Some(room) => (room.room_id.clone(), room.guest),
            None => {
                log::warn!("join room response from a non-owner: session={}", id);
                if self
                    .send_error(
                        id,
                        COMMAND_JOIN_ROOM,
                        ERROR_ROOM_NOT_FOUND,
                        "No room found where you are the owner",
                    )
                    .await
                    .is_err()
                {
                    self.destroy_session(id).await;
                }
                return Ok(());
            }
        };

        let guest = match guest {
            Some(guest) => guest,
            None => {
                log::warn!("join room response into an empty room: room={}", room_id);
                if self
                    .send_error(id, COMMAND_JOIN_ROOM, ERROR_NO_PARTICIPANT, "You are in an empty room")
                    .await
                    .is_err()
                {
                    self.destroy_room(&room_id).await;
                }
                return Ok(());
            }
        };

        let payload = match frame.get_connect_room_result() {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("invalid join room response payload: session={}, error={}", id, err);
                let _ = self
                    .send_error(id, COMMAND_JOIN_ROOM, ERROR_INVALID_PAYLOAD, "Invalid join room response payload")
                    .await;
                self.destroy_session(id).await;
                return Ok(());
            }
        };

        let mut response = self.pool.obtain();
        response.set_response_command(COMMAND_JOIN_ROOM);
        let sent = match response.set_connect_room_result(&payload) {
            Ok(()) => self.write_frame(guest, &response).await,
            Err(err) => Err(err),
        };
        self.pool.release(response);

        if sent.is_err() {
            log::error!("join room response lost its guest: room={}", room_id);
            // drop the guest, keep the room waiting for another participant
            self.close_session(guest).await;
            self.rooms.clear_guest(&room_id);
            if self
                .send_error(
                    id,
                    COMMAND_JOIN_ROOM,
                    ERROR_NO_PARTICIPANT,
                    "Participant disconnected during the response sending, the room is waiting for another participant",
                )
                .await
                .is_err()
            {
                self.destroy_room(&room_id).await;
            }
            return Ok(());
        }

        log::info!(
            "room ready to transport ADB messages: room={}, accepted={}",
            room_id,
            payload.accepted
        );
        Ok(())
    }

    /// Opaque relay: the frame goes to the other participant of the
    /// sender's room untouched. The inner ADB bytes are never parsed here.
    async fn handle_adb_transport(&mut self, id: SessionId, frame: &TransportFrame) -> Result<()> {
        let (room_id, peer) = match self.rooms.room_of(id) {
            Some(room) => {
                let peer = if room.owner == id {
                    room.guest
                } else {
                    Some(room.owner)
                };
                (room.room_id.clone(), peer)
            }
            None => {
                if self
                    .send_error(id, COMMAND_ADB_TRANSPORT, ERROR_NO_PARTICIPANT, "You are not in a room")
                    .await
                    .is_err()
                {
                    self.destroy_session(id).await;
                }
                return Ok(());
            }
        };

        let peer = match peer {
            Some(peer) => peer,
            None => {
                if self
                    .send_error(id, COMMAND_ADB_TRANSPORT, ERROR_NO_PARTICIPANT, "You are in an empty room")
                    .await
                    .is_err()
                {
                    self.destroy_session(id).await;
                }
                return Ok(());
            }
        };

        log::trace!(
            "forwarding frame: room={}, from={}, to={}, size={}",
            room_id,
            id,
            peer,
            frame.payload_length()
        );
        if let Err(err) = self.write_frame(peer, frame).await {
            log::error!("forward failed: room={}, error={}", room_id, err);
            self.destroy_room(&room_id).await;
        }
        Ok(())
    }

    async fn handle_disconnect(&mut self, id: SessionId) {
        if self.sessions.contains_key(&id) {
            self.destroy_session(id).await;
        } else if id.0 > self.last_registered {
            self.early_disconnects.insert(id);
        }
    }

    fn state_of(&self, id: SessionId) -> Option<SessionState> {
        self.sessions.get(&id).map(|session| session.state)
    }

    async fn write_frame(&mut self, id: SessionId, frame: &TransportFrame) -> Result<(), codec::Error> {
        let session = self.sessions.get_mut(&id).ok_or_else(|| {
            codec::Error::Io(std::io::Error::from(std::io::ErrorKind::NotConnected))
        })?;
        frame.write_to(&mut session.writer).await
    }

    async fn send_error(
        &mut self,
        id: SessionId,
        command: u32,
        error_code: u32,
        error_message: &str,
    ) -> Result<(), codec::Error> {
        let mut frame = self.pool.obtain();
        frame.set_error_response_command(command);
        let result = match frame.set_error(&ErrorPayload {
            error_code,
            error_message: error_message.to_string(),
        }) {
            Ok(()) => self.write_frame(id, &frame).await,
            Err(err) => Err(err),
        };
        self.pool.release(frame);
        result
    }

    /// Tear the socket down without touching the room table. Safe to call
    /// twice; the second call finds nothing.
    async fn close_session(&mut self, id: SessionId) {
        if let Some(mut session) = self.sessions.remove(&id) {
            session.cancel.cancel();
            let _ = session.writer.shutdown().await;
            log::info!("session closed: session={}", id);
        }
    }

    /// Close the session and apply the room consequences: an owner takes
    /// the whole room (and its guest) down with it, a guest only frees
    /// the slot.
    async fn destroy_session(&mut self, id: SessionId) {
        if !self.sessions.contains_key(&id) {
            return;
        }
        self.close_session(id).await;
        match self.rooms.depart(id) {
            Departure::OwnerLeft(room) => {
                log::info!("room closed with its owner: room={}", room.room_id);
                if let Some(guest) = room.guest {
                    self.close_session(guest).await;
                }
            }
            Departure::GuestLeft(room_id) => {
                log::info!("guest left, room stays open: room={}", room_id);
            }
            Departure::NotInRoom => {}
        }
    }

    async fn destroy_room(&mut self, room_id: &str) {
        if let Some(room) = self.rooms.remove(room_id) {
            log::info!("room destroyed: room={}", room.room_id);
            self.close_session(room.owner).await;
            if let Some(guest) = room.guest {
                self.close_session(guest).await;
            }
        }
    }
}
