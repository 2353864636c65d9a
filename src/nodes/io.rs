//! Device I/O nodes.
//!
//! `Dac` and `Adc` are the only nodes that touch the device's channel
//! buffers. They resolve the channels during `prepare` and stay out of the
//! schedule when the chain is not attached to a device.

use crate::buffer::SharedBuffer;
use crate::node::{PrepareContext, ProcBuffers, ProcInfo, Processor};
use crate::signal;

/// Sends its inputs to device output channels. N in / 0 out, where N is
/// the number of channels given at construction.
///
/// The device manager zeroes its output channels at the top of each block
/// and the dac *adds* into them, so several dacs can feed one channel.
pub struct Dac {
    channels: Vec<usize>,
    outs: Vec<(usize, SharedBuffer)>,
}

impl Dac {
    /// `channels[i]` is the device output channel fed by input `i`.
    pub fn new(channels: Vec<usize>) -> Self {
        Self {
            channels,
            outs: Vec::new(),
        }
    }

    /// A dac for device channels 0..count.
    pub fn with_channel_count(count: usize) -> Self {
        Self::new((0..count).collect())
    }
}

impl Processor for Dac {
    fn name(&self) -> &'static str {
        "dac"
    }

    fn num_inputs(&self) -> usize {
        self.channels.len()
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        self.outs.clear();
        ctx.should_perform(false);

        if let Some(device) = ctx.device() {
            for (input, &channel) in self.channels.iter().enumerate() {
                if let Some(buffer) = device.output(channel) {
                    self.outs.push((input, buffer.clone()));
                }
            }
        }
        if !self.outs.is_empty() {
            ctx.should_perform(true);
        }
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        for (input, channel) in self.outs.iter() {
            if let Some(src) = buffers.input(*input) {
                let mut out = channel.borrow_mut();
                signal::vadd(&src, &mut out);
            }
        }
    }

    fn release(&mut self) {
        self.outs.clear();
    }
}

/// Reads device input channels. 0 in / N out.
pub struct Adc {
    channels: Vec<usize>,
    ins: Vec<(usize, SharedBuffer)>,
}

impl Adc {
    /// `channels[k]` is the device input channel copied to output `k`.
    pub fn new(channels: Vec<usize>) -> Self {
        Self {
            channels,
            ins: Vec::new(),
        }
    }

    /// An adc for device channels 0..count.
    pub fn with_channel_count(count: usize) -> Self {
        Self::new((0..count).collect())
    }
}

impl Processor for Adc {
    fn name(&self) -> &'static str {
        "adc"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        self.channels.len()
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        self.ins.clear();
        ctx.should_perform(false);

        if let Some(device) = ctx.device() {
            for (output, &channel) in self.channels.iter().enumerate() {
                if let Some(buffer) = device.input(channel) {
                    self.ins.push((output, buffer.clone()));
                }
            }
        }
        if !self.ins.is_empty() {
            ctx.should_perform(true);
        }
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        for (output, channel) in self.ins.iter() {
            if let Some(mut out) = buffers.output(*output) {
                let src = channel.borrow();
                signal::vcopy(&src, &mut out);
            }
        }
    }

    fn release(&mut self) {
        self.ins.clear();
    }
}
