//! Top-level handle wiring the boxer, sender, outbox and deliverer together.

use std::sync::Arc;

use sealpost_config::{SealpostConfig, WireVersion};
use sealpost_outbox::{FileOutbox, OutboxStore};
use sealpost_types::{ConversationId, MessageBoxedVersion, MessageId, MessagePlaintext, OutboxId};
use tracing::info;

use crate::boxer::Boxer;
use crate::context::RequestContext;
use crate::deliverer::Deliverer;
use crate::error::Result;
use crate::sender::{ActiveDevice, SendReceipt, Sender};
use crate::traits::{KeyProvider, LocalCache, RemoteLog};

/// The services a [`Sealpost`] instance talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub keys: Arc<dyn KeyProvider>,
    pub remote: Arc<dyn RemoteLog>,
    pub cache: Arc<dyn LocalCache>,
    pub device: ActiveDevice,
}

/// Maps the configured wire version onto the boxed version tag.
pub fn wire_version(version: WireVersion) -> MessageBoxedVersion {
    match version {
        WireVersion::V1 => MessageBoxedVersion::V1,
        WireVersion::V2 => MessageBoxedVersion::V2,
    }
}

/// A messaging client for one signed-in device.
///
/// # Example
///
/// ```ignore
/// use sealpost::{Collaborators, Sealpost, SealpostConfig};
///
/// let client = Sealpost::open(SealpostConfig::load()?, collaborators)?;
/// client.start()?;
///
/// let outbox_id = client.queue(&ctx, conv_id, plaintext, last_seen)?;
/// ```
pub struct Sealpost {
    config: SealpostConfig,
    boxer: Arc<Boxer>,
    sender: Arc<Sender>,
    deliverer: Deliverer,
}

impl Sealpost {
    /// Opens the file outbox named by the configuration and wires everything
    /// up. The deliverer is not started.
    pub fn open(config: SealpostConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let outbox = FileOutbox::open(config.outbox.path())?;
        Self::with_outbox(config, collaborators, Arc::new(outbox))
    }

    /// Like [`Sealpost::open`] with a caller-supplied outbox.
    pub fn with_outbox(
        config: SealpostConfig,
        collaborators: Collaborators,
        outbox: Arc<dyn OutboxStore>,
    ) -> Result<Self> {
        config.validate()?;
        let Collaborators {
            keys,
            remote,
            cache,
            device,
        } = collaborators;

        let boxer = Arc::new(Boxer::new(keys));
        let sender = Arc::new(
            Sender::new(Arc::clone(&boxer), remote, cache, device)
                .with_history_window(config.sender.history_window)
                .with_version(wire_version(config.boxer.default_version)),
        );
        let deliverer = Deliverer::new(outbox, sender.clone(), &config.deliverer);

        info!(
            version = %wire_version(config.boxer.default_version),
            outbox = %config.outbox.path().display(),
            "sealpost opened"
        );
        Ok(Self {
            config,
            boxer,
            sender,
            deliverer,
        })
    }

    pub fn config(&self) -> &SealpostConfig {
        &self.config
    }

    pub fn boxer(&self) -> &Arc<Boxer> {
        &self.boxer
    }

    pub fn sender(&self) -> &Arc<Sender> {
        &self.sender
    }

    pub fn deliverer(&self) -> &Deliverer {
        &self.deliverer
    }

    pub fn start(&self) -> Result<()> {
        Ok(self.deliverer.start()?)
    }

    pub fn stop(&self) -> Result<()> {
        Ok(self.deliverer.stop()?)
    }

    /// Queues a message for background delivery.
    pub fn queue(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> Result<OutboxId> {
        Ok(self.deliverer.queue(ctx, conv_id, plaintext, prev_hint)?)
    }

    /// Sends a message right away, bypassing the outbox.
    pub fn send(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> Result<SendReceipt> {
        Ok(self.sender.send(ctx, conv_id, plaintext, prev_hint)?)
    }
}

impl std::fmt::Debug for Sealpost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sealpost")
            .field("sender", &self.sender)
            .field("deliverer", &self.deliverer)
            .finish_non_exhaustive()
    }
}
