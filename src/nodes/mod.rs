//! The built-in leaf processor library.
//!
//! Constructors of controllable nodes return a `(processor, handle)` pair;
//! the handle side is kept by UI/control code and writes through an atomic,
//! so parameter changes never touch the audio thread's locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::signal::Sample;

pub mod generator;
pub mod io;
pub mod math;
pub mod monitor;

pub use generator::{NoiseSeed, Osc, Phasor, Sig, WhiteNoise};
pub use io::{Adc, Dac};
pub use math::{Plus, PlusVector, Times, TimesVector};
pub use monitor::{Monitor, MonitorHandle};

/// Control-side handle to one scalar parameter of a running node.
///
/// Values are stored as f64 bits regardless of the crate's sample
/// precision, so nothing is lost under the `double-precision` feature.
#[derive(Clone)]
pub struct ParamHandle {
    bits: Arc<AtomicU64>,
}

impl ParamHandle {
    pub(crate) fn new(value: Sample) -> Self {
        Self {
            bits: Arc::new(AtomicU64::new((value as f64).to_bits())),
        }
    }

    pub fn set(&self, value: Sample) {
        self.bits.store((value as f64).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> Sample {
        f64::from_bits(self.bits.load(Ordering::Relaxed)) as Sample
    }
}
