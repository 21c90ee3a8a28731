//! Message wire model.
//!
//! A message moves through three shapes:
//!
//! ```text
//! MessagePlaintext --box--> MessageBoxed --post--> MessageBoxed + MessageServerHeader
//! ```
//!
//! The boxed form is immutable once created. The server header is the only
//! part attached after the fact.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    DeviceId, HeaderHash, KeyId, MessageId, OutboxId, Timestamp, TlfId, TopicId, Uid,
};

// ============================================================================
// Conversation addressing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TopicType {
    #[default]
    Chat,
    Dev,
}

/// The triple that names a conversation inside an encryption domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct ConversationTriple {
    pub tlf_id: TlfId,
    pub topic_type: TopicType,
    pub topic_id: TopicId,
}

// ============================================================================
// Message types and bodies
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    Text,
    Edit,
    Delete,
    Reaction,
    Metadata,
    Headline,
    Join,
    Leave,
    System,
}

impl MessageType {
    /// Returns true for types that point at another message via `supersedes`.
    pub fn is_superseding(self) -> bool {
        matches!(
            self,
            MessageType::Edit | MessageType::Delete | MessageType::Reaction
        )
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MessageType::Text => "TEXT",
            MessageType::Edit => "EDIT",
            MessageType::Delete => "DELETE",
            MessageType::Reaction => "REACTION",
            MessageType::Metadata => "METADATA",
            MessageType::Headline => "HEADLINE",
            MessageType::Join => "JOIN",
            MessageType::Leave => "LEAVE",
            MessageType::System => "SYSTEM",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditBody {
    pub message_id: MessageId,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteBody {
    pub message_ids: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactionBody {
    pub message_id: MessageId,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataBody {
    pub conversation_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadlineBody {
    pub headline: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemBody {
    pub text: String,
}

/// Message body, tagged by message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    Text(TextBody),
    Edit(EditBody),
    Delete(DeleteBody),
    Reaction(ReactionBody),
    Metadata(MetadataBody),
    Headline(HeadlineBody),
    Join,
    Leave,
    System(SystemBody),
}

impl MessageBody {
    pub fn text(body: impl Into<String>) -> Self {
        MessageBody::Text(TextBody { body: body.into() })
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            MessageBody::Text(_) => MessageType::Text,
            MessageBody::Edit(_) => MessageType::Edit,
            MessageBody::Delete(_) => MessageType::Delete,
            MessageBody::Reaction(_) => MessageType::Reaction,
            MessageBody::Metadata(_) => MessageType::Metadata,
            MessageBody::Headline(_) => MessageType::Headline,
            MessageBody::Join => MessageType::Join,
            MessageBody::Leave => MessageType::Leave,
            MessageBody::System(_) => MessageType::System,
        }
    }

    /// The message this body modifies, if any.
    pub fn supersedes(&self) -> Option<MessageId> {
        match self {
            MessageBody::Edit(edit) => Some(edit.message_id),
            MessageBody::Reaction(reaction) => Some(reaction.message_id),
            MessageBody::Delete(delete) => delete.message_ids.first().copied(),
            _ => None,
        }
    }
}

// ============================================================================
// Headers
// ============================================================================

/// A client-asserted claim that message `id` has header hash `hash`.
///
/// # Invariants
///
/// A message with id `i` may only carry pointers with `id < i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PrevPointer {
    pub id: MessageId,
    pub hash: HeaderHash,
}

/// Delivery metadata for messages sent through the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxInfo {
    /// The newest message the composer had seen when the message was queued.
    pub prev_msg_id: MessageId,
    pub compose_time: Timestamp,
}

/// Marks a message as exploding.
///
/// Exploding messages can see the whole chain, but ordinary messages never
/// point at them, so they can disappear without leaving a trace in the
/// regular chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EphemeralMetadata {
    pub lifetime_secs: u64,
}

/// The client-authored header of a message.
///
/// `sender`, `sender_device` and `prev` are populated by the sender pipeline;
/// callers leave them empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageClientHeader {
    pub conv: ConversationTriple,
    pub tlf_name: String,
    pub tlf_public: bool,
    pub message_type: MessageType,
    pub supersedes: Option<MessageId>,
    pub deletes: Vec<MessageId>,
    pub prev: Vec<PrevPointer>,
    pub sender: Option<Uid>,
    pub sender_device: Option<DeviceId>,
    pub outbox_id: Option<OutboxId>,
    pub outbox_info: Option<OutboxInfo>,
    pub ephemeral: Option<EphemeralMetadata>,
}

impl MessageClientHeader {
    pub fn new(
        conv: ConversationTriple,
        tlf_name: impl Into<String>,
        tlf_public: bool,
        message_type: MessageType,
    ) -> Self {
        Self {
            conv,
            tlf_name: tlf_name.into(),
            tlf_public,
            message_type,
            supersedes: None,
            deletes: Vec::new(),
            prev: Vec::new(),
            sender: None,
            sender_device: None,
            outbox_id: None,
            outbox_info: None,
            ephemeral: None,
        }
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral.is_some()
    }
}

/// An application message before boxing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePlaintext {
    pub client_header: MessageClientHeader,
    pub body: MessageBody,
}

impl MessagePlaintext {
    /// Builds a plaintext whose header type and `supersedes` follow the body.
    pub fn new(
        conv: ConversationTriple,
        tlf_name: impl Into<String>,
        tlf_public: bool,
        body: MessageBody,
    ) -> Self {
        let mut client_header =
            MessageClientHeader::new(conv, tlf_name, tlf_public, body.message_type());
        client_header.supersedes = body.supersedes();
        if let MessageBody::Delete(delete) = &body {
            client_header.deletes.clone_from(&delete.message_ids);
        }
        Self {
            client_header,
            body,
        }
    }

    pub fn with_ephemeral(mut self, lifetime_secs: u64) -> Self {
        self.client_header.ephemeral = Some(EphemeralMetadata { lifetime_secs });
        self
    }

    pub fn is_ephemeral(&self) -> bool {
        self.client_header.is_ephemeral()
    }
}

/// Fields assigned by the ordering server when a message is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct MessageServerHeader {
    pub message_id: MessageId,
    /// Message that replaced or deleted this one; zero when none.
    pub superseded_by: MessageId,
    pub ctime: Timestamp,
}

// ============================================================================
// Boxed form
// ============================================================================

/// Wire version of a boxed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MessageBoxedVersion {
    /// Messages that predate versioning. Unboxed as V1 with legacy leniency.
    #[default]
    VNone,
    /// Symmetric seal plus detached header signature.
    V1,
    /// Sign-then-encrypt header over a derived key.
    V2,
}

impl MessageBoxedVersion {
    pub const CURRENT: MessageBoxedVersion = MessageBoxedVersion::V2;

    pub fn as_i32(self) -> i32 {
        match self {
            MessageBoxedVersion::VNone => 0,
            MessageBoxedVersion::V1 => 1,
            MessageBoxedVersion::V2 => 2,
        }
    }
}

impl std::fmt::Display for MessageBoxedVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageBoxedVersion::VNone => f.write_str("VNONE"),
            MessageBoxedVersion::V1 => f.write_str("V1"),
            MessageBoxedVersion::V2 => f.write_str("V2"),
        }
    }
}

/// A sealed blob with the nonce it was sealed under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct EncryptedData {
    /// Ciphertext format version.
    pub version: u32,
    pub nonce: Bytes,
    pub sealed: Bytes,
}

impl EncryptedData {
    pub fn is_empty(&self) -> bool {
        self.sealed.is_empty()
    }
}

/// Detached signature over a header envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub version: u32,
    pub signature: Bytes,
    pub key_id: KeyId,
}

/// An encrypted, authenticated message as stored and transported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBoxed {
    pub version: MessageBoxedVersion,
    pub server_header: Option<MessageServerHeader>,
    /// Cleartext copy of the header the server needs for routing.
    pub client_header: MessageClientHeader,
    pub header_ciphertext: EncryptedData,
    pub body_ciphertext: EncryptedData,
    /// Signing key for V2 messages; absent in V1.
    pub verify_key: Option<KeyId>,
    pub key_generation: u32,
}

impl MessageBoxed {
    pub fn message_id(&self) -> Option<MessageId> {
        self.server_header.map(|h| h.message_id)
    }

    /// Returns a copy with the server-assigned header attached.
    pub fn with_server_header(mut self, server_header: MessageServerHeader) -> Self {
        self.server_header = Some(server_header);
        self
    }
}
