use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::{Consumer, Producer, RingBuffer};

use crate::node::{PrepareContext, ProcBuffers, ProcInfo, Processor};
use crate::signal::Sample;

/// Control-side end of a [`Monitor`] tap.
pub struct MonitorHandle {
    /// Pop captured samples from here, e.g. for metering or scopes.
    pub rx: Consumer<Sample>,
    active: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&mut self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }
}

/// Pass-through tap, 1 in / 1 out.
///
/// Processes in place, so it costs nothing on the signal path; while
/// active it pushes the block into a ring buffer drained by the handle.
/// Samples are dropped when the ring is full.
pub struct Monitor {
    active: Arc<AtomicBool>,
    tx: Producer<Sample>,
}

impl Monitor {
    pub fn new(capacity: usize, active: bool) -> (Self, MonitorHandle) {
        let (tx, rx) = RingBuffer::<Sample>::new(capacity).split();
        let active = Arc::new(AtomicBool::new(active));

        (
            Self {
                active: Arc::clone(&active),
                tx,
            },
            MonitorHandle { rx, active },
        )
    }
}

impl Processor for Monitor {
    fn name(&self) -> &'static str {
        "monitor"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_input_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        // Output 0 aliases input 0; the summed input is read through it.
        if let Some(out) = buffers.output(0) {
            self.tx.push_slice(&out);
        }
    }
}
