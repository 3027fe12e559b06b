//! Progress events emitted while a batch runs.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;

/// Progress of one pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Emitted after every candidate, skipped ones included.
    Resolution { processed: usize, total: usize },
    /// Emitted after every chunk.
    Issuance {
        processed: usize,
        total: usize,
        success_count: usize,
        failure_count: usize,
        estimated_remaining_seconds: u64,
    },
}

/// Sends progress events to whoever is listening.
///
/// A disabled emitter, or one whose receiver has been dropped, swallows
/// events; progress never affects the outcome of a batch.
#[derive(Debug, Clone, Default)]
pub struct ProgressEmitter {
    sender: Option<UnboundedSender<ProgressEvent>>,
}

impl ProgressEmitter {
    pub fn new(sender: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(sender) = &self.sender {
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_emit_delivers_in_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let emitter = ProgressEmitter::new(tx);

        emitter.emit(ProgressEvent::Resolution { processed: 1, total: 2 });
        emitter.emit(ProgressEvent::Resolution { processed: 2, total: 2 });

        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Resolution { processed: 1, total: 2 }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            ProgressEvent::Resolution { processed: 2, total: 2 }
        );
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        ProgressEmitter::new(tx).emit(ProgressEvent::Resolution { processed: 1, total: 1 });
        ProgressEmitter::disabled().emit(ProgressEvent::Resolution { processed: 1, total: 1 });
    }

    #[test]
    fn test_serializes_with_phase_tag() {
        let json = serde_json::to_value(ProgressEvent::Issuance {
            processed: 5,
            total: 7,
            success_count: 3,
            failure_count: 2,
            estimated_remaining_seconds: 4,
        })
        .unwrap();

        assert_eq!(json["phase"], "issuance");
        assert_eq!(json["processed"], 5);
        assert_eq!(json["estimated_remaining_seconds"], 4);
    }
}
