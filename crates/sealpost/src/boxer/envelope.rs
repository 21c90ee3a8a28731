//! Plaintext envelopes sealed inside a boxed message.
//!
//! Both envelopes are versioned enums so a future layout can be added as a
//! new variant; an unknown variant fails to decode and the message is
//! reported as malformed.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use sealpost_types::{
    BodyHash, ConversationTriple, DeviceId, EphemeralMetadata, MessageBody, MessageClientHeader,
    MessageId, MessageType, OutboxId, OutboxInfo, PrevPointer, SignatureInfo, Uid,
};

use crate::error::{BoxingError, BoxingResult, UnboxingErrorKind, UnboxingResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum HeaderPlaintext {
    V1(HeaderPlaintextV1),
}

/// The signed header. Mirrors [`MessageClientHeader`] with the sender
/// fields made mandatory and the body hash added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct HeaderPlaintextV1 {
    pub conv: ConversationTriple,
    pub tlf_name: String,
    pub tlf_public: bool,
    pub message_type: MessageType,
    pub prev: Vec<PrevPointer>,
    pub sender: Uid,
    pub sender_device: DeviceId,
    pub supersedes: Option<MessageId>,
    pub deletes: Vec<MessageId>,
    pub outbox_id: Option<OutboxId>,
    pub outbox_info: Option<OutboxInfo>,
    pub ephemeral: Option<EphemeralMetadata>,
    pub body_hash: BodyHash,
    /// Detached signature (V1 only). Always `None` while signing.
    pub header_signature: Option<SignatureInfo>,
}

impl HeaderPlaintextV1 {
    pub fn new(header: &MessageClientHeader, body_hash: BodyHash) -> BoxingResult<Self> {
        let sender = header.sender.ok_or(BoxingError::LoginRequired)?;
        let sender_device = header.sender_device.ok_or(BoxingError::DeviceRequired)?;
        Ok(Self {
            conv: header.conv,
            tlf_name: header.tlf_name.clone(),
            tlf_public: header.tlf_public,
            message_type: header.message_type,
            prev: header.prev.clone(),
            sender,
            sender_device,
            supersedes: header.supersedes,
            deletes: header.deletes.clone(),
            outbox_id: header.outbox_id,
            outbox_info: header.outbox_info,
            ephemeral: header.ephemeral,
            body_hash,
            header_signature: None,
        })
    }

    pub fn to_client_header(&self) -> MessageClientHeader {
        MessageClientHeader {
            conv: self.conv,
            tlf_name: self.tlf_name.clone(),
            tlf_public: self.tlf_public,
            message_type: self.message_type,
            supersedes: self.supersedes,
            deletes: self.deletes.clone(),
            prev: self.prev.clone(),
            sender: Some(self.sender),
            sender_device: Some(self.sender_device),
            outbox_id: self.outbox_id,
            outbox_info: self.outbox_info,
            ephemeral: self.ephemeral,
        }
    }

    /// Bytes covered by the V1 detached signature.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, postcard::Error> {
        let mut unsigned = self.clone();
        unsigned.header_signature = None;
        encode(&HeaderPlaintext::V1(unsigned))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum BodyPlaintext {
    V1 { body: MessageBody },
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, postcard::Error> {
    postcard::to_allocvec(value)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8], what: &str) -> UnboxingResult<T> {
    postcard::from_bytes(bytes)
        .map_err(|e| UnboxingErrorKind::Malformed(format!("{what}: {e}")).into())
}
