//! Scalar and vector arithmetic nodes.
//!
//! All of these process in place: the engine's default aliasing binds
//! output 0 to input 0, so the scalar forms apply their operation directly
//! to the aliased output and the vector forms fold input 1 into it.

use crate::node::{PrepareContext, ProcBuffers, ProcInfo, Processor};
use crate::nodes::ParamHandle;
use crate::signal::{self, Sample};

/// Add a constant, 1 in / 1 out.
pub struct Plus {
    value: ParamHandle,
}

impl Plus {
    pub fn new(value: Sample) -> (Self, ParamHandle) {
        let handle = ParamHandle::new(value);
        (
            Self {
                value: handle.clone(),
            },
            handle,
        )
    }
}

impl Processor for Plus {
    fn name(&self) -> &'static str {
        "plus"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            signal::vsadd(self.value.get(), &mut out);
        }
    }
}

/// Add two signals, 2 in / 1 out.
pub struct PlusVector;

impl PlusVector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlusVector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for PlusVector {
    fn name(&self) -> &'static str {
        "plus~"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        // Output 0 aliases input 0; fold input 1 into it.
        let (Some(rhs), Some(mut out)) = (buffers.input(1), buffers.output(0)) else {
            return;
        };
        signal::vadd(&rhs, &mut out);
    }
}

/// Multiply by a constant, 1 in / 1 out. A gain stage.
pub struct Times {
    value: ParamHandle,
}

impl Times {
    pub fn new(value: Sample) -> (Self, ParamHandle) {
        let handle = ParamHandle::new(value);
        (
            Self {
                value: handle.clone(),
            },
            handle,
        )
    }
}

impl Processor for Times {
    fn name(&self) -> &'static str {
        "times"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            signal::vsmul(self.value.get(), &mut out);
        }
    }
}

/// Multiply two signals, 2 in / 1 out. A ring modulator.
pub struct TimesVector;

impl TimesVector {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TimesVector {
    fn default() -> Self {
        Self::new()
    }
}

impl Processor for TimesVector {
    fn name(&self) -> &'static str {
        "times~"
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        let (Some(rhs), Some(mut out)) = (buffers.input(1), buffers.output(0)) else {
            return;
        };
        signal::vmul(&rhs, &mut out);
    }
}
