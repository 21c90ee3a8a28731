//! Background delivery of outbox records.
//!
//! One worker thread drains the outbox in global order (compose time, then
//! ordinal). It wakes when a record is queued, when a caller forces a pass,
//! when the connection comes back, and every `sweep_interval` regardless.
//!
//! # Per-record lifecycle
//!
//! ```text
//! queue() -> Sending { attempts: 0 }
//!   post ok             -> removed, Sent event
//!   immediate failure   -> Error { Rejected }, Failed event
//!   other failure       -> Sending { attempts + 1 }, Retrying event
//!                          or Error { TooManyAttempts }, Failed event
//! ```
//!
//! A pass stops at the first failure so later messages never overtake an
//! earlier one. A parked record holds back the rest of its conversation
//! until it is retried or cancelled, and running out of attempts parks the
//! whole conversation. A record is only removed after the server confirmed the
//! post; if the removal itself fails the record is posted again on the next
//! pass and the server answers with the original header.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use sealpost_config::DelivererConfig;
use sealpost_outbox::{FailureKind, OutboxError, OutboxRecord, OutboxStore, RecordState};
use sealpost_types::{ConversationId, MessageId, MessagePlaintext, OutboxId};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::context::RequestContext;
use crate::error::{DeliveryError, DeliveryResult};
use crate::events::{DeliveryBroadcast, DeliveryEvent};
use crate::sender::MessageSender;
use crate::wake_queue::{WakeQueue, WakeReason};

const WORKER_THREAD_NAME: &str = "sealpost-deliverer";

/// What one pass over the outbox did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Records posted and removed.
    pub sent: usize,
    /// Records parked in the error state.
    pub failed: usize,
    /// Records that failed and stay queued.
    pub retrying: usize,
    /// The pass did not run because the deliverer is offline.
    pub offline: bool,
}

struct Inner {
    outbox: Arc<dyn OutboxStore>,
    sender: Arc<dyn MessageSender>,
    wake: WakeQueue,
    events: DeliveryBroadcast,
    max_attempts: u32,
    sweep_interval: Duration,
    enabled: bool,
    stopping: AtomicBool,
    connected: AtomicBool,
    /// Serializes passes between the worker and direct callers.
    pass_lock: Mutex<()>,
    worker_thread: Mutex<Option<Thread>>,
}

pub struct Deliverer {
    inner: Arc<Inner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Deliverer {
    pub fn new(
        outbox: Arc<dyn OutboxStore>,
        sender: Arc<dyn MessageSender>,
        config: &DelivererConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                outbox,
                sender,
                wake: WakeQueue::new(config.wake_queue_capacity),
                events: DeliveryBroadcast::default(),
                max_attempts: config.max_attempts.max(1),
                sweep_interval: config.sweep_interval(),
                enabled: config.enabled,
                stopping: AtomicBool::new(false),
                connected: AtomicBool::new(true),
                pass_lock: Mutex::new(()),
                worker_thread: Mutex::new(None),
            }),
            worker: Mutex::new(None),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawns the worker. Records already in the outbox are delivered right
    /// away. Starting a running deliverer does nothing.
    pub fn start(&self) -> DeliveryResult<()> {
        if !self.inner.enabled {
            return Err(DeliveryError::Disabled);
        }
        let mut worker = self.worker.lock().map_err(|_| DeliveryError::LockPoisoned)?;
        if worker.is_some() {
            return Ok(());
        }

        self.inner.stopping.store(false, Ordering::Release);
        // Wakes left over from the previous worker carry no meaning now.
        self.inner.wake.drain();
        self.inner.wake.push(WakeReason::Forced);

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || inner.worker_loop())
            .map_err(DeliveryError::Spawn)?;

        *self
            .inner
            .worker_thread
            .lock()
            .map_err(|_| DeliveryError::LockPoisoned)? = Some(handle.thread().clone());
        handle.thread().unpark();
        *worker = Some(handle);

        info!(
            sweep_interval_ms = self.inner.sweep_interval.as_millis() as u64,
            max_attempts = self.inner.max_attempts,
            "deliverer started"
        );
        Ok(())
    }

    /// Stops the worker and waits for the current pass to finish. Stopping a
    /// stopped deliverer does nothing.
    pub fn stop(&self) -> DeliveryResult<()> {
        let handle = self
            .worker
            .lock()
            .map_err(|_| DeliveryError::LockPoisoned)?
            .take();
        let Some(handle) = handle else {
            return Ok(());
        };

        self.inner.stopping.store(true, Ordering::Release);
        handle.thread().unpark();

        if handle.join().is_err() {
            error!("delivery worker panicked");
        }
        if let Ok(mut thread) = self.inner.worker_thread.lock() {
            *thread = None;
        }
        info!("deliverer stopped");
        Ok(())
    }

    /// The background worker is running.
    pub fn is_delivering(&self) -> bool {
        self.worker.lock().map(|w| w.is_some()).unwrap_or(false)
    }

    // ========================================================================
    // Connectivity
    // ========================================================================

    /// Resumes sending and wakes the worker.
    pub fn connected(&self) {
        self.inner.connected.store(true, Ordering::Release);
        self.inner.wake_worker(WakeReason::Reconnected);
        debug!("deliverer connected");
    }

    /// Holds records until [`Deliverer::connected`] is called.
    pub fn disconnected(&self) {
        self.inner.connected.store(false, Ordering::Release);
        debug!("deliverer disconnected");
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Persists a message for delivery and wakes the worker.
    pub fn queue(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        plaintext: MessagePlaintext,
        prev_hint: MessageId,
    ) -> DeliveryResult<OutboxId> {
        ctx.check()?;
        let record = self.inner.outbox.push(conv_id, plaintext, prev_hint)?;
        self.inner.wake_worker(WakeReason::Enqueued);
        debug!(
            correlation_id = %ctx.correlation_id(),
            %conv_id,
            outbox_id = %record.outbox_id,
            ordinal = record.ordinal,
            "message queued"
        );
        Ok(record.outbox_id)
    }

    /// Asks the worker for a pass now.
    pub fn force_deliver(&self) {
        self.inner.wake_worker(WakeReason::Forced);
    }

    /// Number of records still waiting to be sent.
    pub fn pending(&self) -> DeliveryResult<usize> {
        Ok(self.inner.outbox.pending()?)
    }

    /// Every record of a conversation, queued or failed.
    pub fn records(&self, conv_id: ConversationId) -> DeliveryResult<Vec<OutboxRecord>> {
        Ok(self.inner.outbox.pull_conversation(conv_id)?)
    }

    /// Puts a failed record back in line and wakes the worker.
    pub fn retry(&self, outbox_id: &OutboxId) -> DeliveryResult<OutboxRecord> {
        let record = self.inner.outbox.retry(outbox_id).map_err(unknown_record)?;
        self.inner.wake_worker(WakeReason::Forced);
        info!(%outbox_id, "record retried");
        Ok(record)
    }

    /// Removes a record that has not been sent yet.
    pub fn cancel(&self, outbox_id: &OutboxId) -> DeliveryResult<OutboxRecord> {
        let record = self
            .inner
            .outbox
            .remove(outbox_id)?
            .ok_or(DeliveryError::UnknownRecord(*outbox_id))?;
        info!(%outbox_id, "record cancelled");
        Ok(record)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.inner.events.subscribe()
    }

    /// Runs one pass on the calling thread.
    pub fn deliver_pending(&self, ctx: &RequestContext) -> DeliveryResult<PassReport> {
        self.inner.deliver_pending(ctx)
    }
}

impl Drop for Deliverer {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!(error = %err, "deliverer did not stop cleanly");
        }
    }
}

impl std::fmt::Debug for Deliverer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deliverer")
            .field("delivering", &self.is_delivering())
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

fn unknown_record(err: OutboxError) -> DeliveryError {
    match err {
        OutboxError::NotFound(id) => DeliveryError::UnknownRecord(id),
        other => DeliveryError::Outbox(other),
    }
}

// ============================================================================
// Worker
// ============================================================================

impl Inner {
    fn wake_worker(&self, reason: WakeReason) {
        self.wake.push(reason);
        if let Ok(thread) = self.worker_thread.lock() {
            if let Some(thread) = thread.as_ref() {
                thread.unpark();
            }
        }
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::Acquire)
    }

    fn worker_loop(&self) {
        debug!("delivery worker running");
        loop {
            if self.is_stopping() {
                break;
            }
            let reasons = self.wake.drain();
            debug!(wakes = reasons.len(), "delivery worker woke");

            let ctx = RequestContext::new();
            if let Err(err) = self.deliver_pending(&ctx) {
                error!(
                    correlation_id = %ctx.correlation_id(),
                    error = %err,
                    "delivery pass failed"
                );
            }

            if self.is_stopping() {
                break;
            }
            if self.wake.is_empty() {
                thread::park_timeout(self.sweep_interval);
            }
        }
        debug!("delivery worker exiting");
    }

    fn deliver_pending(&self, ctx: &RequestContext) -> DeliveryResult<PassReport> {
        let _pass = self.pass_lock.lock().map_err(|_| DeliveryError::LockPoisoned)?;
        let mut report = PassReport::default();

        if !self.connected.load(Ordering::Acquire) {
            debug!(correlation_id = %ctx.correlation_id(), "offline, pass skipped");
            report.offline = true;
            return Ok(report);
        }

        let stored = self.outbox.pull_all().inspect_err(|err| {
            error!(correlation_id = %ctx.correlation_id(), error = %err, "outbox read failed");
        })?;
        let records = sendable(stored);
        if records.is_empty() {
            return Ok(report);
        }
        debug!(
            correlation_id = %ctx.correlation_id(),
            pending = records.len(),
            "delivery pass started"
        );

        for record in records {
            if self.is_stopping() || !self.connected.load(Ordering::Acquire) {
                break;
            }
            ctx.check()?;
            if !self.deliver_one(ctx, record, &mut report)? {
                break;
            }
        }

        debug!(
            correlation_id = %ctx.correlation_id(),
            sent = report.sent,
            failed = report.failed,
            retrying = report.retrying,
            "delivery pass finished"
        );
        Ok(report)
    }

    /// Sends one record. Returns whether the pass may go on.
    fn deliver_one(
        &self,
        ctx: &RequestContext,
        record: OutboxRecord,
        report: &mut PassReport,
    ) -> DeliveryResult<bool> {
        let outbox_id = record.outbox_id;
        let conv_id = record.conv_id;
        let attempts = record.attempts();

        let err = match self
            .sender
            .send(ctx, conv_id, record.plaintext, record.prev_hint)
        {
            Ok(receipt) => {
                self.outbox.remove(&outbox_id).inspect_err(|err| {
                    error!(
                        correlation_id = %ctx.correlation_id(),
                        %outbox_id,
                        error = %err,
                        "sent record not removed"
                    );
                })?;
                self.events.send(DeliveryEvent::Sent {
                    outbox_id,
                    conv_id,
                    message_id: receipt.message_id,
                });
                report.sent += 1;
                return Ok(true);
            }
            Err(err) => err,
        };

        let message = err.to_string();
        warn!(
            correlation_id = %ctx.correlation_id(),
            %outbox_id,
            %conv_id,
            attempts,
            immediate = err.is_immediate_fail(),
            error = %message,
            "delivery attempt failed"
        );

        let recorded = if err.is_immediate_fail() {
            self.outbox
                .mark_as_error(&outbox_id, FailureKind::Rejected, &message)
        } else {
            self.outbox
                .record_failed_attempt(&outbox_id, self.max_attempts, &message)
        };
        let updated = recorded.inspect_err(|err| {
            error!(
                correlation_id = %ctx.correlation_id(),
                %outbox_id,
                error = %err,
                "failed attempt not recorded"
            );
        })?;

        match updated.state {
            RecordState::Sending { attempts } => {
                report.retrying += 1;
                self.events.send(DeliveryEvent::Retrying {
                    outbox_id,
                    conv_id,
                    attempts,
                });
            }
            RecordState::Error { kind, message } => {
                report.failed += 1;
                self.events.send(DeliveryEvent::Failed {
                    outbox_id,
                    conv_id,
                    kind,
                    message,
                });
                if kind == FailureKind::TooManyAttempts {
                    self.fail_conversation(ctx, conv_id, report)?;
                }
            }
        }
        Ok(false)
    }

    /// Parks the rest of a conversation behind a record that ran out of
    /// attempts.
    fn fail_conversation(
        &self,
        ctx: &RequestContext,
        conv_id: ConversationId,
        report: &mut PassReport,
    ) -> DeliveryResult<()> {
        let marked = self
            .outbox
            .mark_conversation_as_error(
                conv_id,
                FailureKind::TooManyAttempts,
                "an earlier message in the conversation failed",
            )
            .inspect_err(|err| {
                error!(
                    correlation_id = %ctx.correlation_id(),
                    %conv_id,
                    error = %err,
                    "conversation not marked as failed"
                );
            })?;
        if !marked.is_empty() {
            warn!(
                correlation_id = %ctx.correlation_id(),
                %conv_id,
                parked = marked.len(),
                "conversation parked after too many attempts"
            );
        }
        for record in marked {
            let RecordState::Error { kind, message } = record.state else {
                continue;
            };
            report.failed += 1;
            self.events.send(DeliveryEvent::Failed {
                outbox_id: record.outbox_id,
                conv_id,
                kind,
                message,
            });
        }
        Ok(())
    }
}

/// Records a pass may send, in drain order. A parked record holds back every
/// later record of its conversation until it is retried or cancelled.
fn sendable(records: Vec<OutboxRecord>) -> Vec<OutboxRecord> {
    let mut held: HashSet<ConversationId> = HashSet::new();
    records
        .into_iter()
        .filter(|record| {
            if !record.state.is_sending() {
                held.insert(record.conv_id);
                return false;
            }
            !held.contains(&record.conv_id)
        })
        .collect()
}
