use std::sync::{Arc, Weak};

use basedrop::{Collector, Handle};
use parking_lot::Mutex;

use crate::backend::{AudioBackend, BackendError};
use crate::buffer::{Buffer, BufferClass, BufferId, SharedBuffer};
use crate::context::Context;
use crate::signal::Sample;

/// The device's per-channel sample buffers for the current block.
///
/// The backend fills the input channels before a tick and reads the output
/// channels after it. I/O nodes resolve these during `prepare` and read or
/// accumulate into them directly; output channels are zeroed at the top of
/// every block because DAC-style nodes *add* into them.
#[derive(Clone)]
pub struct DeviceIo {
    pub(crate) inputs: Vec<SharedBuffer>,
    pub(crate) outputs: Vec<SharedBuffer>,
}

impl DeviceIo {
    fn empty() -> Self {
        Self {
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// The capture buffer of input channel `channel`.
    pub fn input(&self, channel: usize) -> Option<&SharedBuffer> {
        self.inputs.get(channel)
    }

    /// The playback buffer of output channel `channel`.
    pub fn output(&self, channel: usize) -> Option<&SharedBuffer> {
        self.outputs.get(channel)
    }
}

struct DeviceState {
    sample_rate: u32,
    vector_size: usize,
    io: DeviceIo,
}

/// Root of the runtime: owns the audio backend, the contexts it drives and
/// the per-channel device buffers.
///
/// The manager is the clock source: the backend invokes
/// [`process_block`](DeviceManager::process_block) exactly once per audio
/// block, which ticks every running context. Configuration setters stop
/// active contexts and leave the caller to restart them.
pub struct DeviceManager {
    backend: Mutex<Box<dyn AudioBackend>>,
    contexts: Mutex<Vec<Arc<Context>>>,
    state: Mutex<DeviceState>,
    collector: Mutex<Collector>,
    coll_handle: Handle,
}

impl DeviceManager {
    pub fn new(backend: Box<dyn AudioBackend>) -> Arc<DeviceManager> {
        let collector = Collector::new();
        let coll_handle = collector.handle();

        let sample_rate = backend.default_sample_rate();
        let vector_size = backend.default_vector_size();
        let num_inputs = backend.num_input_channels();
        let num_outputs = backend.num_output_channels();

        let manager = Arc::new(DeviceManager {
            backend: Mutex::new(backend),
            contexts: Mutex::new(Vec::new()),
            state: Mutex::new(DeviceState {
                sample_rate,
                vector_size,
                io: DeviceIo::empty(),
            }),
            collector: Mutex::new(collector),
            coll_handle,
        });
        manager.state.lock().io = manager.alloc_io(num_inputs, num_outputs, vector_size);
        manager
    }

    fn alloc_io(&self, num_inputs: usize, num_outputs: usize, vector_size: usize) -> DeviceIo {
        let channel = |class: BufferClass, index: usize| {
            SharedBuffer::new(
                Buffer::new(vector_size),
                BufferId {
                    class,
                    owner: 0,
                    port: index as u32,
                },
                &self.coll_handle,
            )
        };
        DeviceIo {
            inputs: (0..num_inputs)
                .map(|i| channel(BufferClass::DeviceIn, i))
                .collect(),
            outputs: (0..num_outputs)
                .map(|i| channel(BufferClass::DeviceOut, i))
                .collect(),
        }
    }

    /// Handle for allocating buffers that may be dropped while the audio
    /// thread is live.
    pub(crate) fn collector_handle(&self) -> Handle {
        self.coll_handle.clone()
    }

    /// Reclaim buffers whose last reference was dropped. Runs on the
    /// control thread; called from `stop` and the setters.
    pub fn collect(&self) {
        self.collector.lock().collect();
    }

    pub fn sample_rate(&self) -> u32 {
        self.state.lock().sample_rate
    }

    pub fn vector_size(&self) -> usize {
        self.state.lock().vector_size
    }

    pub fn num_input_channels(&self) -> usize {
        self.state.lock().io.inputs.len()
    }

    pub fn num_output_channels(&self) -> usize {
        self.state.lock().io.outputs.len()
    }

    /// Snapshot of the channel buffers; cheap handle clones.
    pub fn io_buffers(&self) -> DeviceIo {
        self.state.lock().io.clone()
    }

    pub fn input_buffer(&self, channel: usize) -> Option<SharedBuffer> {
        self.state.lock().io.inputs.get(channel).cloned()
    }

    pub fn output_buffer(&self, channel: usize) -> Option<SharedBuffer> {
        self.state.lock().io.outputs.get(channel).cloned()
    }

    // Backend queries.

    pub fn backend_name(&self) -> String {
        self.backend.lock().name().to_string()
    }

    pub fn available_drivers(&self) -> Vec<String> {
        self.backend.lock().available_drivers()
    }

    pub fn driver_name(&self) -> Option<String> {
        self.backend.lock().driver_name()
    }

    pub fn available_input_devices(&self) -> Vec<String> {
        self.backend.lock().available_input_devices()
    }

    pub fn available_output_devices(&self) -> Vec<String> {
        self.backend.lock().available_output_devices()
    }

    pub fn input_device_name(&self) -> Option<String> {
        self.backend.lock().input_device_name()
    }

    pub fn output_device_name(&self) -> Option<String> {
        self.backend.lock().output_device_name()
    }

    pub fn available_sample_rates(&self) -> Vec<u32> {
        self.backend.lock().available_sample_rates()
    }

    pub fn available_vector_sizes(&self) -> Vec<usize> {
        self.backend.lock().available_vector_sizes()
    }

    // Setters. Each stops the stream and every active context, applies the
    // change, and leaves restarting to the caller so contexts only ever
    // observe consistent parameters.

    pub fn set_driver(&self, driver: &str) -> Result<(), BackendError> {
        self.halt_for_reconfigure();
        {
            let mut backend = self.backend.lock();
            backend.set_driver(driver)?;
            let (nin, nout) = (backend.num_input_channels(), backend.num_output_channels());
            let mut state = self.state.lock();
            let vector_size = state.vector_size;
            state.io = self.alloc_io(nin, nout, vector_size);
        }
        self.collect();
        Ok(())
    }

    pub fn set_input_device(&self, device: &str) -> Result<(), BackendError> {
        self.halt_for_reconfigure();
        {
            let mut backend = self.backend.lock();
            backend.set_input_device(device)?;
            let (nin, nout) = (backend.num_input_channels(), backend.num_output_channels());
            let mut state = self.state.lock();
            let vector_size = state.vector_size;
            state.io = self.alloc_io(nin, nout, vector_size);
        }
        self.collect();
        Ok(())
    }

    pub fn set_output_device(&self, device: &str) -> Result<(), BackendError> {
        self.halt_for_reconfigure();
        {
            let mut backend = self.backend.lock();
            backend.set_output_device(device)?;
            let (nin, nout) = (backend.num_input_channels(), backend.num_output_channels());
            let mut state = self.state.lock();
            let vector_size = state.vector_size;
            state.io = self.alloc_io(nin, nout, vector_size);
        }
        self.collect();
        Ok(())
    }

    pub fn set_sample_rate(&self, sample_rate: u32) {
        self.halt_for_reconfigure();
        let advertised = self.backend.lock().available_sample_rates();
        if !advertised.contains(&sample_rate) {
            log::warn!("sample rate {} Hz not advertised by the backend", sample_rate);
        }
        self.state.lock().sample_rate = sample_rate;
    }

    pub fn set_vector_size(&self, vector_size: usize) {
        self.halt_for_reconfigure();
        {
            let mut state = self.state.lock();
            state.vector_size = vector_size;
            let (nin, nout) = (state.io.inputs.len(), state.io.outputs.len());
            state.io = self.alloc_io(nin, nout, vector_size);
        }
        self.collect();
    }

    /// Stop the stream and every running context before a configuration
    /// change.
    fn halt_for_reconfigure(&self) {
        self.backend.lock().stop();
        let contexts: Vec<Arc<Context>> = self.contexts.lock().clone();
        for context in contexts {
            if context.is_running() {
                context.stop();
            }
        }
    }

    /// Start the backend stream. Each block the backend hands interleaved
    /// input and output to [`process_block`](DeviceManager::process_block).
    pub fn start(self: &Arc<Self>) -> Result<(), BackendError> {
        let (sample_rate, vector_size) = {
            let state = self.state.lock();
            (state.sample_rate, state.vector_size)
        };
        let weak: Weak<DeviceManager> = Arc::downgrade(self);
        let callback = Box::new(move |input: &[Sample], output: &mut [Sample]| {
            if let Some(manager) = weak.upgrade() {
                manager.process_block(input, output);
            }
        });
        self.backend.lock().start(sample_rate, vector_size, callback)
    }

    /// Stop the backend stream.
    pub fn stop(&self) {
        self.backend.lock().stop();
        self.collect();
    }

    /// Process one block: deinterleave captured input into the channel
    /// buffers, zero the output channels, tick every running context, then
    /// interleave the output channels into `output`.
    ///
    /// `input` and `output` are interleaved by the device channel counts;
    /// the backend calls this exactly once per block.
    pub fn process_block(&self, input: &[Sample], output: &mut [Sample]) {
        {
            let state = self.state.lock();
            let num_inputs = state.io.inputs.len();
            for (channel, shared) in state.io.inputs.iter().enumerate() {
                let mut buffer = shared.borrow_mut();
                buffer.clear();
                for (i, frame) in input.chunks_exact(num_inputs).take(buffer.len()).enumerate() {
                    buffer[i] = frame[channel];
                }
            }
            for shared in state.io.outputs.iter() {
                shared.borrow_mut().clear();
            }
        }

        self.tick();

        {
            let state = self.state.lock();
            let num_outputs = state.io.outputs.len();
            if num_outputs > 0 {
                for (channel, shared) in state.io.outputs.iter().enumerate() {
                    let buffer = shared.borrow();
                    for (i, frame) in output.chunks_exact_mut(num_outputs).enumerate() {
                        if i >= buffer.len() {
                            break;
                        }
                        frame[channel] = buffer[i];
                    }
                }
            }
        }
    }

    /// Tick every running context once. Called once per block, after the
    /// input channel buffers are filled and before the output channels are
    /// read back.
    pub fn tick(&self) {
        let contexts = self.contexts.lock();
        for context in contexts.iter() {
            if context.is_running() {
                context.tick();
            }
        }
    }

    /// Register `context`, deduplicated by identity. Called by
    /// [`Context::start`].
    pub(crate) fn attach(&self, context: &Arc<Context>) {
        let mut contexts = self.contexts.lock();
        if !contexts.iter().any(|c| Arc::ptr_eq(c, context)) {
            contexts.push(Arc::clone(context));
        }
    }

    /// Unregister `context`. Called by [`Context::stop`].
    pub(crate) fn detach(&self, context: &Arc<Context>) {
        let mut contexts = self.contexts.lock();
        if let Some(position) = contexts.iter().position(|c| Arc::ptr_eq(c, context)) {
            contexts.remove(position);
        }
    }

    pub fn num_contexts(&self) -> usize {
        self.contexts.lock().len()
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.backend.lock().stop();
        self.collector.lock().collect();
    }
}
