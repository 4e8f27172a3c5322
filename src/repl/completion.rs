//! Per-apply completion handles.
//!
//! A handle carries the RECEIVED/COMPLETED pair for one live operation.
//! `received` is idempotent; `complete`/`fail` consume the handle, so the
//! terminal event happens at most once and always after RECEIVED. A handle
//! dropped unfinished (an entity that panicked or forgot it) reports
//! COMPLETED as a failure.

use std::sync::Arc;

use crate::core::{ReplicationAck, SequenceNumber, ServerId};

use super::collab::AckSender;

enum Mode {
    /// Sync traffic: never acknowledged individually.
    Silent,
    Acking {
        sender: Arc<dyn AckSender>,
        target: ServerId,
        sequence: SequenceNumber,
        received_sent: bool,
        completed_sent: bool,
    },
}

pub struct CompletionHandle {
    mode: Mode,
}

impl CompletionHandle {
    pub fn acking(sender: Arc<dyn AckSender>, target: ServerId, sequence: SequenceNumber) -> Self {
        Self {
            mode: Mode::Acking {
                sender,
                target,
                sequence,
                received_sent: false,
                completed_sent: false,
            },
        }
    }

    pub fn silent() -> Self {
        Self { mode: Mode::Silent }
    }

    pub fn is_silent(&self) -> bool {
        matches!(self.mode, Mode::Silent)
    }

    pub fn sequence(&self) -> Option<SequenceNumber> {
        match &self.mode {
            Mode::Silent => None,
            Mode::Acking { sequence, .. } => Some(*sequence),
        }
    }

    /// Emit RECEIVED once.
    pub fn received(&mut self) {
        if let Mode::Acking {
            sender,
            target,
            sequence,
            received_sent,
            ..
        } = &mut self.mode
        {
            if *received_sent {
                return;
            }
            *received_sent = true;
            send(
                sender.as_ref(),
                target,
                ReplicationAck::Received {
                    sequence: *sequence,
                },
            );
        }
    }

    pub fn complete(self) {
        self.finish(true);
    }

    pub fn fail(self) {
        self.finish(false);
    }

    /// Emit RECEIVED and retire the handle with no terminal event, for
    /// operations that arrived but will never be applied.
    pub fn retire_received(mut self) {
        self.received();
        if let Mode::Acking { completed_sent, .. } = &mut self.mode {
            *completed_sent = true;
        }
    }

    fn finish(mut self, success: bool) {
        self.send_completed(success);
    }

    fn send_completed(&mut self, success: bool) {
        self.received();
        if let Mode::Acking {
            sender,
            target,
            sequence,
            completed_sent,
            ..
        } = &mut self.mode
        {
            if *completed_sent {
                return;
            }
            *completed_sent = true;
            send(
                sender.as_ref(),
                target,
                ReplicationAck::Completed {
                    sequence: *sequence,
                    success,
                },
            );
        }
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        let unfinished = match &self.mode {
            Mode::Acking {
                target,
                sequence,
                completed_sent: false,
                ..
            } => Some((target.clone(), *sequence)),
            _ => None,
        };
        if let Some((target, sequence)) = unfinished {
            tracing::warn!(
                peer = %target,
                sequence = sequence.get(),
                "completion dropped unfinished; reporting failure"
            );
            self.send_completed(false);
        }
    }
}

impl std::fmt::Debug for CompletionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.mode {
            Mode::Silent => f.write_str("CompletionHandle(silent)"),
            Mode::Acking {
                target,
                sequence,
                received_sent,
                completed_sent,
                ..
            } => f
                .debug_struct("CompletionHandle")
                .field("target", target)
                .field("sequence", sequence)
                .field("received_sent", received_sent)
                .field("completed_sent", completed_sent)
                .finish(),
        }
    }
}

// Delivery faults are left to the transport's own retry/failover.
fn send(sender: &dyn AckSender, target: &ServerId, ack: ReplicationAck) {
    if let Err(err) = sender.send_to(target, ack) {
        tracing::warn!(
            peer = %target,
            sequence = ack.sequence().get(),
            error = %err,
            "acknowledgement not delivered"
        );
    }
}
