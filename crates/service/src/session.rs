/// Identity of one accepted transporter connection, assigned by the
/// acceptor and never reused for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a transporter-side client session while it is registered
/// with the dispatcher.
///
/// Only registered sessions carry a state: a connection enters the
/// session table as `Handshaking` when the dispatcher registers the
/// accepted socket, and closing a session removes it from the table.
/// The accepted-but-unregistered and closed phases are therefore absence
/// from the table, not variants here, and removal happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Ready,
    InRoomAsOwner,
    InRoomAsGuest,
}

impl SessionState {
    pub fn is_in_room(&self) -> bool {
        matches!(self, Self::InRoomAsOwner | Self::InRoomAsGuest)
    }
}
