use std::{net::SocketAddr, time::Duration};

use anyhow::Result;
use codec::{
    COMMAND_ADB_TRANSPORT, COMMAND_CONNECT, COMMAND_CREATE_ROOM, COMMAND_JOIN_ROOM,
    PROTOCOL_VERSION,
    frame::TransportFrame,
    payload::{ConnectPayload, ConnectRoomPayload, ConnectRoomResultPayload},
};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use adb_remote_transporter::server;

/// One raw protocol peer driving the transporter from the outside.
struct Peer {
    stream: TcpStream,
    frame: TransportFrame,
}

impl Peer {
    async fn connect(addr: SocketAddr) -> Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
            frame: TransportFrame::new(),
        })
    }

    async fn send(&mut self, build: impl FnOnce(&mut TransportFrame)) -> Result<()> {
        let mut frame = TransportFrame::new();
        build(&mut frame);
        frame.write_to(&mut self.stream).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<&TransportFrame> {
        self.frame.read_from(&mut self.stream).await?;
        self.frame.verify_payload_crc()?;
        Ok(&self.frame)
    }

    async fn recv_eof(&mut self) -> Result<bool> {
        let read = tokio::time::timeout(
            Duration::from_secs(2),
            self.frame.read_from(&mut self.stream),
        )
        .await?;
        Ok(matches!(read, Err(err) if err.is_eof()))
    }

    async fn handshake(&mut self) -> Result<String> {
        self.send(|frame| {
            frame.set_direct_command(COMMAND_CONNECT);
            frame
                .set_connect(&ConnectPayload {
                    protocol_version: PROTOCOL_VERSION,
                })
                .unwrap();
        })
        .await?;
        let frame = self.recv().await?;
        assert_eq!(frame.command(), 0x1001);
        Ok(frame.get_connect_response()?.client_id)
    }

    async fn create_room(&mut self) -> Result<String> {
        self.send(|frame| {
            frame.set_direct_command(COMMAND_CREATE_ROOM);
            frame.set_payload(&[]).unwrap();
        })
        .await?;
        let frame = self.recv().await?;
        assert_eq!(frame.command(), 0x1003);
        Ok(frame.get_create_room_response()?.room_id)
    }

    async fn send_join_room(&mut self, room_id: &str) -> Result<()> {
        let room_id = room_id.to_string();
        self.send(move |frame| {
            frame.set_direct_command(COMMAND_JOIN_ROOM);
            frame
                .set_connect_room(&ConnectRoomPayload {
                    room_id,
                    client_id: String::new(),
                })
                .unwrap();
        })
        .await
    }

    async fn send_join_room_response(&mut self, accepted: u32) -> Result<()> {
        self.send(move |frame| {
            frame.set_response_command(COMMAND_JOIN_ROOM);
            frame
                .set_connect_room_result(&ConnectRoomResultPayload { accepted })
                .unwrap();
        })
        .await
    }
}

async fn start_server() -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let token = CancellationToken::new();
    tokio::spawn(server::serve(listener, token));
    Ok(addr)
}

fn assert_id_format(id: &str) {
    assert_eq!(id.len(), 8, "unexpected id: {id}");
    assert!(id[..4].chars().all(|c| c.is_ascii_uppercase()));
    assert!(id[4..].chars().all(|c| c.is_ascii_digit()));
}

/// Establish an accepted room with one owner and one guest.
async fn establish_room(addr: SocketAddr) -> Result<(Peer, Peer, String)> {
    let mut owner = Peer::connect(addr).await?;
    owner.handshake().await?;
    let room_id = owner.create_room().await?;

    let mut guest = Peer::connect(addr).await?;
    let guest_client_id = guest.handshake().await?;

    guest.send_join_room(&room_id).await?;
    let request = owner.recv().await?;
    assert_eq!(request.command(), 0x0004);
    let payload = request.get_connect_room()?;
    assert_eq!(payload.room_id, room_id);
    assert_eq!(payload.client_id, guest_client_id);

    owner.send_join_room_response(1).await?;
    let response = guest.recv().await?;
    assert_eq!(response.command(), 0x1004);
    assert_eq!(response.get_connect_room_result()?.accepted, 1);

    Ok((owner, guest, room_id))
}

#[tokio::test]
async fn test_protocol_version_mismatch() -> Result<()> {
    let addr = start_server().await?;
    let mut peer = Peer::connect(addr).await?;

    peer.send(|frame| {
        frame.set_direct_command(COMMAND_CONNECT);
        frame
            .set_connect(&ConnectPayload {
                protocol_version: 0x0002,
            })
            .unwrap();
    })
    .await?;

    let frame = peer.recv().await?;
    assert_eq!(frame.command(), 0x2001);
    assert!(frame.is_error());
    let error = frame.get_error()?;
    assert_eq!(error.error_code, 1);
    assert!(error.error_message.starts_with("Protocol version mismatch"));

    assert!(peer.recv_eof().await?);
    Ok(())
}

#[tokio::test]
async fn test_create_and_join_room() -> Result<()> {
    let addr = start_server().await?;

    let mut owner = Peer::connect(addr).await?;
    let owner_client_id = owner.handshake().await?;
    assert_id_format(&owner_client_id);

    let room_id = owner.create_room().await?;
    assert_id_format(&room_id);

    let mut guest = Peer::connect(addr).await?;
    let guest_client_id = guest.handshake().await?;
    assert_id_format(&guest_client_id);
    assert_ne!(owner_client_id, guest_client_id);

    guest.send_join_room(&room_id).await?;

    // the owner receives a direct, non-response JoinRoom notification
    let request = owner.recv().await?;
    assert_eq!(request.command(), 0x0004);
    let payload = request.get_connect_room()?;
    assert_eq!(payload.room_id, room_id);
    assert_eq!(payload.client_id, guest_client_id);

    owner.send_join_room_response(1).await?;
    let response = guest.recv().await?;
    assert_eq!(response.command(), 0x1004);
    assert_eq!(response.get_connect_room_result()?.accepted, 1);
    Ok(())
}

#[tokio::test]
async fn test_join_unknown_room() -> Result<()> {
    let addr = start_server().await?;
    let mut guest = Peer::connect(addr).await?;
    guest.handshake().await?;

    guest.send_join_room("ZZZZ0000").await?;
    let frame = guest.recv().await?;
    assert_eq!(frame.command(), 0x2004);
    assert_eq!(frame.get_error()?.error_code, 3);
    Ok(())
}

#[tokio::test]
async fn test_double_create_room() -> Result<()> {
    let addr = start_server().await?;
    let mut owner = Peer::connect(addr).await?;
    owner.handshake().await?;
    owner.create_room().await?;

    owner
        .send(|frame| {
            frame.set_direct_command(COMMAND_CREATE_ROOM);
            frame.set_payload(&[]).unwrap();
        })
        .await?;
    let frame = owner.recv().await?;
    assert_eq!(frame.command(), 0x2003);
    assert_eq!(frame.get_error()?.error_code, 2);

    // the session survives the refusal
    owner
        .send(|frame| {
            frame.set_direct_command(COMMAND_CREATE_ROOM);
            frame.set_payload(&[]).unwrap();
        })
        .await?;
    assert_eq!(owner.recv().await?.command(), 0x2003);
    Ok(())
}

#[tokio::test]
async fn test_owner_drop_cascades() -> Result<()> {
    let addr = start_server().await?;
    let (owner, mut guest, room_id) = establish_room(addr).await?;

    drop(owner);
    assert!(guest.recv_eof().await?, "guest socket should be closed");

    // the room is gone from the table
    let mut late = Peer::connect(addr).await?;
    late.handshake().await?;
    late.send_join_room(&room_id).await?;
    let frame = late.recv().await?;
    assert_eq!(frame.command(), 0x2004);
    assert_eq!(frame.get_error()?.error_code, 3);
    Ok(())
}

#[tokio::test]
async fn test_opaque_adb_forward() -> Result<()> {
    let addr = start_server().await?;
    let (mut owner, mut guest, _) = establish_room(addr).await?;

    // a literal 32-byte WRTE packet: 24-byte header plus 8 payload bytes
    let mut packet = Vec::new();
    packet.extend_from_slice(&0x4554_5257u32.to_le_bytes()); // 57 52 54 45
    packet.extend_from_slice(&1u32.to_le_bytes());
    packet.extend_from_slice(&2u32.to_le_bytes());
    packet.extend_from_slice(&8u32.to_le_bytes());
    packet.extend_from_slice(&crc32fast::hash(b"shell:id").to_le_bytes());
    packet.extend_from_slice(&(0x4554_5257u32 ^ 0xFFFF_FFFF).to_le_bytes());
    packet.extend_from_slice(b"shell:id");
    assert_eq!(packet.len(), 32);

    let payload = packet.clone();
    owner
        .send(move |frame| {
            frame.set_direct_command(COMMAND_ADB_TRANSPORT);
            frame.set_payload(&payload).unwrap();
        })
        .await?;

    let frame = guest.recv().await?;
    assert_eq!(frame.command(), COMMAND_ADB_TRANSPORT);
    assert_eq!(frame.payload(), packet.as_slice());

    // and the other direction
    let payload = packet.clone();
    guest
        .send(move |frame| {
            frame.set_direct_command(COMMAND_ADB_TRANSPORT);
            frame.set_payload(&payload).unwrap();
        })
        .await?;
    let frame = owner.recv().await?;
    assert_eq!(frame.payload(), packet.as_slice());
    Ok(())
}

#[tokio::test]
async fn test_adb_transport_without_a_room() -> Result<()> {
    let addr = start_server().await?;
    let mut peer = Peer::connect(addr).await?;
    peer.handshake().await?;

    peer.send(|frame| {
        frame.set_direct_command(COMMAND_ADB_TRANSPORT);
        frame.set_payload(b"whatever").unwrap();
    })
    .await?;
    let frame = peer.recv().await?;
    assert_eq!(frame.command(), 0x2006);
    assert_eq!(frame.get_error()?.error_code, 5);
    Ok(())
}

#[tokio::test]
async fn test_join_a_full_room() -> Result<()> {
    let addr = start_server().await?;
    let (_owner, _guest, room_id) = establish_room(addr).await?;

    let mut second = Peer::connect(addr).await?;
    second.handshake().await?;
    second.send_join_room(&room_id).await?;
    let frame = second.recv().await?;
    assert_eq!(frame.command(), 0x2004);
    assert_eq!(frame.get_error()?.error_code, 4);
    Ok(())
}

#[tokio::test]
async fn test_reconnect_is_rejected() -> Result<()> {
    let addr = start_server().await?;
    let mut peer = Peer::connect(addr).await?;

    peer.send(|frame| {
        frame.set_direct_command(0x0002);
        frame.set_payload(&[]).unwrap();
    })
    .await?;
    let frame = peer.recv().await?;
    assert_eq!(frame.command(), 0x2002);
    assert!(peer.recv_eof().await?);
    Ok(())
}

#[tokio::test]
async fn test_first_frame_must_be_a_handshake() -> Result<()> {
    let addr = start_server().await?;
    let mut peer = Peer::connect(addr).await?;

    peer.send(|frame| {
        frame.set_direct_command(COMMAND_CREATE_ROOM);
        frame.set_payload(&[]).unwrap();
    })
    .await?;
    assert!(peer.recv_eof().await?);
    Ok(())
}
