//! Pluggable audio backend abstraction.
//!
//! [`AudioBackend`] decouples the engine from any specific platform audio
//! API: the [`DeviceManager`](crate::DeviceManager) consumes the trait for
//! driver/device/rate enumeration and for driving the per-block callback.
//! A [`MockBackend`] is provided for tests and manual ticking; a cpal
//! implementation lives behind the `cpal-backend` feature.

use crate::signal::Sample;

/// Per-block processing callback handed to [`AudioBackend::start`].
///
/// Invoked on the audio thread with interleaved input and output sample
/// slices of `vector_size` frames each.
pub type ProcessCallback = Box<dyn FnMut(&[Sample], &mut [Sample]) + Send + 'static>;

/// An error reported by an audio backend. Distinct from
/// [`DspError`](crate::DspError), which covers chain compilation only.
#[derive(Debug, Clone)]
pub struct BackendError {
    message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::error::Error for BackendError {}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "audio backend error: {}", self.message)
    }
}

/// Platform audio API consumed by the device manager.
///
/// Implementations enumerate drivers and devices, expose the stream
/// parameters they can honor, and invoke the process callback exactly once
/// per audio block while started.
pub trait AudioBackend: Send {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    fn available_drivers(&self) -> Vec<String>;

    fn driver_name(&self) -> Option<String>;

    fn set_driver(&mut self, driver: &str) -> Result<(), BackendError>;

    fn available_input_devices(&self) -> Vec<String>;

    fn available_output_devices(&self) -> Vec<String>;

    fn input_device_name(&self) -> Option<String>;

    fn output_device_name(&self) -> Option<String>;

    fn set_input_device(&mut self, device: &str) -> Result<(), BackendError>;

    fn set_output_device(&mut self, device: &str) -> Result<(), BackendError>;

    fn available_sample_rates(&self) -> Vec<u32>;

    fn available_vector_sizes(&self) -> Vec<usize>;

    fn default_sample_rate(&self) -> u32 {
        44100
    }

    fn default_vector_size(&self) -> usize {
        512
    }

    fn num_input_channels(&self) -> usize;

    fn num_output_channels(&self) -> usize;

    /// Open a stream. While started, the backend calls `callback` once per
    /// block with interleaved input and output of exactly `vector_size`
    /// frames.
    fn start(
        &mut self,
        sample_rate: u32,
        vector_size: usize,
        callback: ProcessCallback,
    ) -> Result<(), BackendError>;

    /// Close the stream. Idempotent.
    fn stop(&mut self);
}

/// Deterministic backend with no device behind it.
///
/// Enumeration answers are fixed and `start` opens no stream; blocks are
/// driven by calling [`DeviceManager::process_block`]
/// (crate::DeviceManager::process_block) or
/// [`DeviceManager::tick`](crate::DeviceManager::tick) directly. Used in
/// tests and anywhere the engine is embedded under an external clock.
pub struct MockBackend {
    num_inputs: usize,
    num_outputs: usize,
    sample_rate: u32,
    vector_size: usize,
}

impl MockBackend {
    pub fn new(num_inputs: usize, num_outputs: usize) -> Self {
        Self {
            num_inputs,
            num_outputs,
            sample_rate: 44100,
            vector_size: 64,
        }
    }
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new(2, 2)
    }
}

impl AudioBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    fn available_drivers(&self) -> Vec<String> {
        vec!["mock".to_string()]
    }

    fn driver_name(&self) -> Option<String> {
        Some("mock".to_string())
    }

    fn set_driver(&mut self, driver: &str) -> Result<(), BackendError> {
        if driver == "mock" {
            Ok(())
        } else {
            Err(BackendError::new(format!("unknown driver '{}'", driver)))
        }
    }

    fn available_input_devices(&self) -> Vec<String> {
        vec!["mock input".to_string()]
    }

    fn available_output_devices(&self) -> Vec<String> {
        vec!["mock output".to_string()]
    }

    fn input_device_name(&self) -> Option<String> {
        Some("mock input".to_string())
    }

    fn output_device_name(&self) -> Option<String> {
        Some("mock output".to_string())
    }

    fn set_input_device(&mut self, _device: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn set_output_device(&mut self, _device: &str) -> Result<(), BackendError> {
        Ok(())
    }

    fn available_sample_rates(&self) -> Vec<u32> {
        vec![22050, 44100, 48000, 96000]
    }

    fn available_vector_sizes(&self) -> Vec<usize> {
        vec![4, 16, 64, 128, 256, 512, 1024]
    }

    fn default_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn default_vector_size(&self) -> usize {
        self.vector_size
    }

    fn num_input_channels(&self) -> usize {
        self.num_inputs
    }

    fn num_output_channels(&self) -> usize {
        self.num_outputs
    }

    fn start(
        &mut self,
        _sample_rate: u32,
        _vector_size: usize,
        _callback: ProcessCallback,
    ) -> Result<(), BackendError> {
        Ok(())
    }

    fn stop(&mut self) {}
}
