//! Signed-versus-cleartext header comparison.
//!
//! The server routes on the cleartext header, so every field it could lie
//! about must match the signed copy.

use sealpost_types::MessageClientHeader;

use crate::error::{UnboxingErrorKind, UnboxingResult};

fn mismatch(field: &'static str) -> UnboxingResult<()> {
    Err(UnboxingErrorKind::HeaderMismatch { field }.into())
}

/// Compares the cleartext header against the signed one.
///
/// Outbox fields and the exploding marker are only compared when
/// `compare_outbox` is set; V1 and VNONE headers predate them.
pub(crate) fn compare_headers(
    cleartext: &MessageClientHeader,
    signed: &MessageClientHeader,
    compare_outbox: bool,
) -> UnboxingResult<()> {
    if cleartext.conv != signed.conv {
        return mismatch("conv");
    }
    if cleartext.tlf_name != signed.tlf_name {
        return mismatch("tlf_name");
    }
    if cleartext.tlf_public != signed.tlf_public {
        return mismatch("tlf_public");
    }
    if cleartext.message_type != signed.message_type {
        return mismatch("message_type");
    }
    if cleartext.prev != signed.prev {
        return mismatch("prev");
    }
    if cleartext.sender != signed.sender {
        return mismatch("sender");
    }
    if cleartext.sender_device != signed.sender_device {
        return mismatch("sender_device");
    }
    if cleartext.supersedes != signed.supersedes {
        return mismatch("supersedes");
    }
    if cleartext.deletes != signed.deletes {
        return mismatch("deletes");
    }

    if compare_outbox {
        if cleartext.outbox_id != signed.outbox_id {
            return mismatch("outbox_id");
        }
        if cleartext.outbox_info != signed.outbox_info {
            return mismatch("outbox_info");
        }
        if cleartext.ephemeral != signed.ephemeral {
            return mismatch("ephemeral");
        }
    }
    Ok(())
}
