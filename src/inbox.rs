// THEORY:
// The `inbox` is the push ingress of the engine. Detectors and depth sensors
// run on their own threads or tasks at their own cadence; they hold an
// `InboxSender` and push whenever they have something. The pipeline owns the
// `Inbox` and drains it at the start of every tick, so all state mutation still
// happens on the single logical thread that ticks the pipeline, in a fixed
// order: depth first (only the newest frame matters), then detection batches in
// arrival order.
//
// The channels are unbounded on purpose: producers never block, and per-entity
// resolve throttling bounds the work a burst of batches can cause.

use crate::core_modules::camera::DepthFrame;
use crate::core_modules::detection::detection::DetectionBatch;
use crate::error::{OverlayError, Result};
use tokio::sync::mpsc;

/// Producer half. Cheap to clone; safe to move across threads.
#[derive(Debug, Clone)]
pub struct InboxSender {
    batches: mpsc::UnboundedSender<DetectionBatch>,
    depth: mpsc::UnboundedSender<DepthFrame>,
}

impl InboxSender {
    pub fn send_batch(&self, batch: DetectionBatch) -> Result<()> {
        self.batches.send(batch).map_err(|_| OverlayError::InboxClosed)
    }

    pub fn send_depth(&self, frame: DepthFrame) -> Result<()> {
        self.depth.send(frame).map_err(|_| OverlayError::InboxClosed)
    }

    /// True once the pipeline side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.batches.is_closed()
    }
}

/// Everything that arrived since the previous drain.
#[derive(Debug, Default)]
pub struct Drained {
    /// Newest depth frame, if any arrived.
    pub depth: Option<DepthFrame>,
    /// How many depth frames arrived, including superseded ones.
    pub depth_frames: usize,
    pub batches: Vec<DetectionBatch>,
}

/// Consumer half, owned by the pipeline.
#[derive(Debug)]
pub struct Inbox {
    batches: mpsc::UnboundedReceiver<DetectionBatch>,
    depth: mpsc::UnboundedReceiver<DepthFrame>,
}

impl Inbox {
    /// Takes everything currently queued without waiting.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        while let Ok(frame) = self.depth.try_recv() {
            drained.depth = Some(frame);
            drained.depth_frames += 1;
        }
        while let Ok(batch) = self.batches.try_recv() {
            drained.batches.push(batch);
        }
        drained
    }
}

/// Creates a connected sender/inbox pair.
pub fn channel() -> (InboxSender, Inbox) {
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let (depth_tx, depth_rx) = mpsc::unbounded_channel();
    (
        InboxSender {
            batches: batch_tx,
            depth: depth_tx,
        },
        Inbox {
            batches: batch_rx,
            depth: depth_rx,
        },
    )
}
