//! The result of unboxing: a verified message or a record of why it failed.

use sealpost_types::{
    BodyHash, HeaderHash, KeyId, MessageBody, MessageBoxedVersion, MessageClientHeader, MessageId,
    MessageServerHeader, MessageType, Timestamp,
};

use crate::error::UnboxingErrorKind;

/// A message that opened and verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUnboxedValid {
    pub version: MessageBoxedVersion,
    pub server_header: MessageServerHeader,
    /// The signed copy of the client header.
    pub client_header: MessageClientHeader,
    /// `None` for deleted messages whose body the server dropped.
    pub body: Option<MessageBody>,
    pub header_hash: HeaderHash,
    pub body_hash: BodyHash,
    pub verify_key: KeyId,
    pub key_generation: u32,
    /// Set when the signing device has since been revoked.
    pub sender_device_revoked_at: Option<Timestamp>,
}

impl MessageUnboxedValid {
    pub fn message_id(&self) -> MessageId {
        self.server_header.message_id
    }

    pub fn is_ephemeral(&self) -> bool {
        self.client_header.is_ephemeral()
    }
}

/// A message that can never be unboxed, kept so the thread has no holes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageUnboxedError {
    pub kind: UnboxingErrorKind,
    pub message_id: MessageId,
    pub message_type: MessageType,
    pub ctime: Timestamp,
    pub header_hash: HeaderHash,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageUnboxed {
    Valid(Box<MessageUnboxedValid>),
    Error(MessageUnboxedError),
}

impl MessageUnboxed {
    pub fn message_id(&self) -> MessageId {
        match self {
            MessageUnboxed::Valid(valid) => valid.message_id(),
            MessageUnboxed::Error(err) => err.message_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageUnboxed::Valid(valid) => valid.client_header.message_type,
            MessageUnboxed::Error(err) => err.message_type,
        }
    }

    pub fn header_hash(&self) -> HeaderHash {
        match self {
            MessageUnboxed::Valid(valid) => valid.header_hash,
            MessageUnboxed::Error(err) => err.header_hash,
        }
    }

    pub fn as_valid(&self) -> Option<&MessageUnboxedValid> {
        match self {
            MessageUnboxed::Valid(valid) => Some(valid),
            MessageUnboxed::Error(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, MessageUnboxed::Valid(_))
    }
}

impl From<MessageUnboxedValid> for MessageUnboxed {
    fn from(valid: MessageUnboxedValid) -> Self {
        MessageUnboxed::Valid(Box::new(valid))
    }
}
