//! Wire protocol shared by the Pong server and its clients.
//!
//! Frames are self-delimited text units:
//!
//! ```text
//! <id:7;rid:0;type:1000;|name:Alice;>
//! ```
//!
//! The header carries three integers (`id`, `rid`, `type`), the content is an
//! unordered list of `key:value;` pairs. The bytes `< > \ : ; |` are syntax and
//! must be escaped with a backslash when they appear inside a key or value.
//!
//! [`decode`] reads exactly one frame from an async byte reader and enforces a
//! length limit on every field it reads, so a hostile peer cannot make the
//! parser buffer unbounded input. [`Message::encode`] is its inverse and
//! escapes dynamic content before it reaches the wire.

mod codec;
mod message;

pub use codec::{
    decode, escape, is_control, DecodeError, END_BYTE, ESCAPE_BYTE, HEAD_END_BYTE, LIMIT_HEADER,
    LIMIT_INT, LIMIT_START, LIMIT_STRING, PAIR_DELIMITER, START_BYTE, VALUE_DELIMITER,
};
pub use message::{ClientId, Message, MessageType, SERVER_SOURCE};
