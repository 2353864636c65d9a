use crate::node::{PrepareContext, ProcBuffers, ProcInfo, Processor};
use crate::nodes::ParamHandle;
use crate::signal::{self, Sample};

/// Source of fresh noise seeds.
///
/// Each call advances the same linear congruence the noise nodes use, so a
/// set of noise generators seeded from one sequence stays decorrelated.
pub struct NoiseSeed {
    state: i32,
}

impl NoiseSeed {
    pub fn new() -> Self {
        Self { state: 0 }
    }

    pub fn next_seed(&mut self) -> i32 {
        self.state = 12345i32.wrapping_add(1103515245i32.wrapping_mul(self.state));
        self.state
    }
}

impl Default for NoiseSeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Constant signal generator, 0 in / 1 out.
pub struct Sig {
    value: ParamHandle,
}

impl Sig {
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

impl Processor for Sig {
    fn name(&self) -> &'static str {
        "sig"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            signal::vfill(self.value.get(), &mut out);
        }
    }
}

/// White noise generator, 0 in / 1 out.
pub struct WhiteNoise {
    seed: i32,
}

impl WhiteNoise {
    pub fn new(seed: i32) -> Self {
        Self { seed }
    }

    pub fn from_source(seeds: &mut NoiseSeed) -> Self {
        Self::new(seeds.next_seed())
    }
}

impl Processor for WhiteNoise {
    fn name(&self) -> &'static str {
        "noise"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, _info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            self.seed = signal::vnoise(self.seed, &mut out);
        }
    }
}

/// Wrapping ramp in [0, 1), 0 in / 1 out.
pub struct Phasor {
    frequency: ParamHandle,
    phase: Sample,
}

impl Phasor {
    pub fn new(frequency: Sample, phase: Sample) -> (Self, ParamHandle) {
        let handle = ParamHandle::new(frequency);
        (
            Self {
                frequency: handle.clone(),
                phase,
            },
            handle,
        )
    }
}

impl Processor for Phasor {
    fn name(&self) -> &'static str {
        "phasor"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            let step = (self.frequency.get() as f64 * info.sample_rate_recip) as Sample;
            self.phase = signal::vsphasor(step, self.phase, &mut out);
        }
    }
}

/// Cosine oscillator, 0 in / 1 out.
pub struct Osc {
    frequency: ParamHandle,
    phase: Sample,
}

impl Osc {
    pub fn new(frequency: Sample, phase: Sample) -> (Self, ParamHandle) {
        let handle = ParamHandle::new(frequency);
        (
            Self {
                frequency: handle.clone(),
                phase,
            },
            handle,
        )
    }
}

impl Processor for Osc {
    fn name(&self) -> &'static str {
        "osc"
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        1
    }

    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.should_perform(ctx.is_output_connected(0));
    }

    fn perform(&mut self, info: &ProcInfo, buffers: &mut ProcBuffers) {
        if let Some(mut out) = buffers.output(0) {
            let step = (self.frequency.get() as f64 * info.sample_rate_recip) as Sample;
            self.phase = signal::vosc(step, self.phase, &mut out);
        }
    }
}
