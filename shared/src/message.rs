use crate::codec::escape;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt::Write;

/// Identifier of a transport-level client session. Assigned from 1 upward.
pub type ClientId = u32;

/// `source` value of messages created by the server itself.
pub const SERVER_SOURCE: ClientId = 0;

/// Action codes carried in the `type` header field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Disconnect,
    Register,
    KeepAlive,
    CreateGame,
    JoinGame,
    /// Reserved, the server answers it as an unknown message.
    ReconnectGame,
    ListGames,
    GameState,
    AbandonGame,
    PlayerPositionUpdate,
}

impl MessageType {
    pub const ALL: [MessageType; 10] = [
        MessageType::Disconnect,
        MessageType::Register,
        MessageType::KeepAlive,
        MessageType::CreateGame,
        MessageType::JoinGame,
        MessageType::ReconnectGame,
        MessageType::ListGames,
        MessageType::GameState,
        MessageType::AbandonGame,
        MessageType::PlayerPositionUpdate,
    ];

    /// Numeric code used on the wire.
    pub fn code(self) -> i64 {
        match self {
            MessageType::Disconnect => 20,
            MessageType::Register => 1000,
            MessageType::KeepAlive => 1100,
            MessageType::CreateGame => 2000,
            MessageType::JoinGame => 2100,
            MessageType::ReconnectGame => 2200,
            MessageType::ListGames => 2300,
            MessageType::GameState => 2400,
            MessageType::AbandonGame => 2500,
            MessageType::PlayerPositionUpdate => 3000,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Types that are forwarded to the sender's running game instead of
    /// being handled by the session manager.
    pub fn is_in_game(self) -> bool {
        matches!(
            self,
            MessageType::GameState | MessageType::PlayerPositionUpdate
        )
    }
}

/// One decoded protocol unit.
///
/// `source` is not part of the frame: the decode task stamps it with the
/// originating client session so the session manager knows who asked.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// Request correlation ID
    pub id: i64,
    /// ID of the message this one answers, 0 if none
    pub rid: i64,
    /// Action code, see [`MessageType`]
    pub kind: i64,
    /// Originating client session, [`SERVER_SOURCE`] for server messages
    pub source: ClientId,
    pub content: BTreeMap<String, String>,
}

impl Message {
    pub fn new(kind: MessageType) -> Self {
        Self {
            kind: kind.code(),
            ..Self::default()
        }
    }

    /// Builds the reply skeleton for `request`: same type, `rid` pointing
    /// back at the request's `id`.
    pub fn reply_to(request: &Message) -> Self {
        Self {
            id: 0,
            rid: request.id,
            kind: request.kind,
            source: SERVER_SOURCE,
            content: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    pub fn with_rid(mut self, rid: i64) -> Self {
        self.rid = rid;
        self
    }

    /// Adds a content pair, replacing any previous value under `key`.
    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.content.insert(key.into(), value.to_string());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl ToString) {
        self.content.insert(key.into(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.content.get(key).map(String::as_str)
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_code(self.kind)
    }

    /// Serializes the message into a frame, escaping control bytes found in
    /// keys and values.
    pub fn encode(&self) -> String {
        let mut frame = String::with_capacity(32 + self.content.len() * 16);
        // Writing into a String cannot fail.
        let _ = write!(
            frame,
            "<id:{};rid:{};type:{};|",
            self.id, self.rid, self.kind
        );
        for (key, value) in &self.content {
            frame.push_str(&escape(key));
            frame.push(':');
            frame.push_str(&escape(value));
            frame.push(';');
        }
        frame.push('>');
        frame
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.encode())
    }
}
