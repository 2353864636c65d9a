//! Audio backend driven by cpal.
//!
//! Hosts map to drivers. Streams are f32; other device formats are not
//! converted. cpal streams are not `Send`, so the streams live on a
//! dedicated thread that parks until the backend is stopped; device
//! callbacks re-chunk whatever buffer size the platform delivers into
//! exact `vector_size` blocks for the process callback.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;

use crate::backend::{AudioBackend, BackendError, ProcessCallback};
use crate::signal::Sample;

const RATE_CANDIDATES: [u32; 6] = [22050, 32000, 44100, 48000, 88200, 96000];

pub struct CpalBackend {
    host: cpal::Host,
    input_device: Option<cpal::Device>,
    output_device: Option<cpal::Device>,
    stream: Option<StreamThread>,
}

struct StreamThread {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

impl CpalBackend {
    /// Backend on the platform's default host with its default devices.
    pub fn new() -> Self {
        let host = cpal::default_host();
        let input_device = host.default_input_device();
        let output_device = host.default_output_device();
        Self {
            host,
            input_device,
            output_device,
            stream: None,
        }
    }

    fn device_names<I: Iterator<Item = cpal::Device>>(devices: I) -> Vec<String> {
        devices
            .map(|d| d.name().unwrap_or_else(|_| String::new()))
            .filter(|n| !n.is_empty())
            .collect()
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn available_drivers(&self) -> Vec<String> {
        cpal::available_hosts()
            .iter()
            .map(|id| id.name().to_string())
            .collect()
    }

    fn driver_name(&self) -> Option<String> {
        Some(self.host.id().name().to_string())
    }

    fn set_driver(&mut self, driver: &str) -> Result<(), BackendError> {
        let id = cpal::available_hosts()
            .into_iter()
            .find(|id| id.name() == driver)
            .ok_or_else(|| BackendError::new(format!("unknown driver '{}'", driver)))?;
        let host = cpal::host_from_id(id)
            .map_err(|err| BackendError::new(format!("driver '{}': {}", driver, err)))?;
        self.input_device = host.default_input_device();
        self.output_device = host.default_output_device();
        self.host = host;
        Ok(())
    }

    fn available_input_devices(&self) -> Vec<String> {
        self.host
            .input_devices()
            .map(Self::device_names)
            .unwrap_or_default()
    }

    fn available_output_devices(&self) -> Vec<String> {
        self.host
            .output_devices()
            .map(Self::device_names)
            .unwrap_or_default()
    }

    fn input_device_name(&self) -> Option<String> {
        self.input_device.as_ref().and_then(|d| d.name().ok())
    }

    fn output_device_name(&self) -> Option<String> {
        self.output_device.as_ref().and_then(|d| d.name().ok())
    }

    fn set_input_device(&mut self, device: &str) -> Result<(), BackendError> {
        let found = self.host.input_devices().ok().and_then(|mut devices| {
            devices.find(|d| d.name().map(|n| n == device).unwrap_or(false))
        });
        match found {
            Some(d) => {
                self.input_device = Some(d);
                Ok(())
            }
            None => Err(BackendError::new(format!(
                "unknown input device '{}'",
                device
            ))),
        }
    }

    fn set_output_device(&mut self, device: &str) -> Result<(), BackendError> {
        let found = self.host.output_devices().ok().and_then(|mut devices| {
            devices.find(|d| d.name().map(|n| n == device).unwrap_or(false))
        });
        match found {
            Some(d) => {
                self.output_device = Some(d);
                Ok(())
            }
            None => Err(BackendError::new(format!(
                "unknown output device '{}'",
                device
            ))),
        }
    }

    fn available_sample_rates(&self) -> Vec<u32> {
        let Some(device) = &self.output_device else {
            return Vec::new();
        };
        let Ok(configs) = device.supported_output_configs() else {
            return Vec::new();
        };
        let ranges: Vec<_> = configs.collect();
        RATE_CANDIDATES
            .iter()
            .copied()
            .filter(|rate| {
                ranges
                    .iter()
                    .any(|r| r.min_sample_rate().0 <= *rate && *rate <= r.max_sample_rate().0)
            })
            .collect()
    }

    fn available_vector_sizes(&self) -> Vec<usize> {
        // The engine re-chunks, so any power of two works regardless of the
        // platform's own buffer sizing.
        vec![64, 128, 256, 512, 1024, 2048]
    }

    fn default_sample_rate(&self) -> u32 {
        self.output_device
            .as_ref()
            .and_then(|d| d.default_output_config().ok())
            .map(|c| c.sample_rate().0)
            .unwrap_or(44100)
    }

    fn num_input_channels(&self) -> usize {
        self.input_device
            .as_ref()
            .and_then(|d| d.default_input_config().ok())
            .map(|c| c.channels() as usize)
            .unwrap_or(0)
    }

    fn num_output_channels(&self) -> usize {
        self.output_device
            .as_ref()
            .and_then(|d| d.default_output_config().ok())
            .map(|c| c.channels() as usize)
            .unwrap_or(0)
    }

    fn start(
        &mut self,
        sample_rate: u32,
        vector_size: usize,
        callback: ProcessCallback,
    ) -> Result<(), BackendError> {
        self.stop();

        let output_device = self
            .output_device
            .clone()
            .ok_or_else(|| BackendError::new("no output device selected"))?;
        let num_outputs = self.num_output_channels();
        if num_outputs == 0 || vector_size == 0 {
            return Err(BackendError::new("output device has no channels"));
        }
        let input_device = self.input_device.clone();
        let num_inputs = self.num_input_channels();

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let (ready_tx, ready_rx) = mpsc::channel();
        let thread = std::thread::spawn(move || {
            stream_thread(StreamParams {
                output_device,
                input_device,
                num_outputs,
                num_inputs,
                sample_rate,
                vector_size,
                callback,
                stop: thread_stop,
                ready: ready_tx,
            });
        });

        match ready_rx.recv() {
            Ok(Ok(())) => {
                self.stream = Some(StreamThread { stop, thread });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = thread.join();
                Err(err)
            }
            Err(_) => {
                let _ = thread.join();
                Err(BackendError::new("stream thread exited unexpectedly"))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop.store(true, Ordering::SeqCst);
            stream.thread.thread().unpark();
            let _ = stream.thread.join();
        }
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        AudioBackend::stop(self);
    }
}

struct StreamParams {
    output_device: cpal::Device,
    input_device: Option<cpal::Device>,
    num_outputs: usize,
    num_inputs: usize,
    sample_rate: u32,
    vector_size: usize,
    callback: ProcessCallback,
    stop: Arc<AtomicBool>,
    ready: mpsc::Sender<Result<(), BackendError>>,
}

fn stream_thread(params: StreamParams) {
    let StreamParams {
        output_device,
        input_device,
        num_outputs,
        num_inputs,
        sample_rate,
        vector_size,
        callback,
        stop,
        ready,
    } = params;

    // Captured input, interleaved, bounded so a stalled output stream
    // cannot grow it without limit.
    let capture: Arc<Mutex<VecDeque<Sample>>> = Arc::new(Mutex::new(VecDeque::with_capacity(
        vector_size * num_inputs.max(1) * 4,
    )));

    let _input_stream = match (input_device, num_inputs > 0) {
        (Some(device), true) => {
            let config = cpal::StreamConfig {
                channels: num_inputs as u16,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };
            let ring = Arc::clone(&capture);
            let limit = vector_size * num_inputs * 16;
            let built = device.build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut ring = ring.lock();
                    for &s in data {
                        if ring.len() >= limit {
                            ring.pop_front();
                        }
                        ring.push_back(s as Sample);
                    }
                },
                |err| log::error!("input stream error: {}", err),
                None,
            );
            match built {
                Ok(stream) => {
                    if let Err(err) = stream.play() {
                        log::warn!("input stream failed to start: {}", err);
                    }
                    Some(stream)
                }
                Err(err) => {
                    // Output continues with silent inputs.
                    log::warn!("input stream unavailable: {}", err);
                    None
                }
            }
        }
        _ => None,
    };

    let out_config = cpal::StreamConfig {
        channels: num_outputs as u16,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let ring = Arc::clone(&capture);
    let mut stage_in: Vec<Sample> = vec![0.0; vector_size * num_inputs];
    let mut block_out: Vec<Sample> = vec![0.0; vector_size * num_outputs];
    let mut pending: VecDeque<Sample> = VecDeque::with_capacity(vector_size * num_outputs * 2);
    let mut callback = callback;

    let output_stream = output_device.build_output_stream(
        &out_config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            for sample in data.iter_mut() {
                if pending.is_empty() {
                    {
                        let mut ring = ring.lock();
                        for slot in stage_in.iter_mut() {
                            *slot = ring.pop_front().unwrap_or(0.0);
                        }
                    }
                    for s in block_out.iter_mut() {
                        *s = 0.0;
                    }
                    (callback)(&stage_in, &mut block_out);
                    pending.extend(block_out.iter().copied());
                }
                *sample = pending.pop_front().unwrap_or(0.0) as f32;
            }
        },
        |err| log::error!("output stream error: {}", err),
        None,
    );

    let output_stream = match output_stream {
        Ok(stream) => stream,
        Err(err) => {
            let _ = ready.send(Err(BackendError::new(err.to_string())));
            return;
        }
    };
    if let Err(err) = output_stream.play() {
        let _ = ready.send(Err(BackendError::new(err.to_string())));
        return;
    }
    let _ = ready.send(Ok(()));

    while !stop.load(Ordering::SeqCst) {
        std::thread::park_timeout(Duration::from_millis(50));
    }
    // Streams drop here, closing the device.
}
