use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;

use crate::chain::Chain;
use crate::device::DeviceManager;

/// A tick domain: a set of chains sharing one sample rate and vector size,
/// driven per block by the device manager.
pub struct Context {
    device: Weak<DeviceManager>,
    chains: Mutex<Vec<Arc<Chain>>>,
    running: AtomicBool,
    /// Duration of the last tick in microseconds, stored as f64 bits so
    /// readers need no lock.
    cpu_micros: AtomicU64,
    /// Scaling factor turning the tick duration into a load figure,
    /// computed at start as 1e-5 * sample_rate / vector_size.
    cpu_factor: AtomicU64,
}

impl Context {
    pub fn new(device: &Arc<DeviceManager>) -> Arc<Context> {
        Arc::new(Context {
            device: Arc::downgrade(device),
            chains: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            cpu_micros: AtomicU64::new(0f64.to_bits()),
            cpu_factor: AtomicU64::new(0f64.to_bits()),
        })
    }

    pub fn device_manager(&self) -> Option<Arc<DeviceManager>> {
        self.device.upgrade()
    }

    /// The device sample rate, or 0 if the device manager is gone.
    pub fn sample_rate(&self) -> u32 {
        self.device.upgrade().map_or(0, |d| d.sample_rate())
    }

    /// The device vector size, or 0 if the device manager is gone.
    pub fn vector_size(&self) -> usize {
        self.device.upgrade().map_or(0, |d| d.vector_size())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn num_chains(&self) -> usize {
        self.chains.lock().len()
    }

    /// CPU load of the last tick: measured duration scaled by the opaque
    /// factor computed at start.
    pub fn cpu(&self) -> f64 {
        let micros = f64::from_bits(self.cpu_micros.load(Ordering::Relaxed));
        let factor = f64::from_bits(self.cpu_factor.load(Ordering::Relaxed));
        micros * factor
    }

    /// Register `chain` with this context, deduplicated by identity.
    pub fn add(&self, chain: &Arc<Chain>) {
        let mut chains = self.chains.lock();
        if !chains.iter().any(|c| Arc::ptr_eq(c, chain)) {
            chains.push(Arc::clone(chain));
        }
    }

    /// Unregister `chain`. If the context is running, the chain is stopped.
    pub fn remove(&self, chain: &Arc<Chain>) {
        let found = {
            let mut chains = self.chains.lock();
            match chains.iter().position(|c| Arc::ptr_eq(c, chain)) {
                Some(position) => {
                    chains.remove(position);
                    true
                }
                None => false,
            }
        };
        if found && self.is_running() {
            chain.stop();
        }
    }

    /// Attach to the device manager and start ticking.
    pub fn start(self: &Arc<Self>) {
        let Some(device) = self.device.upgrade() else {
            log::warn!("context start ignored: device manager is gone");
            return;
        };
        if self.is_running() {
            self.stop();
        }
        device.attach(self);
        self.running.store(true, Ordering::SeqCst);

        let sample_rate = f64::from(device.sample_rate());
        let vector_size = device.vector_size() as f64;
        let factor = if vector_size > 0.0 {
            1e-5 * sample_rate / vector_size
        } else {
            0.0
        };
        self.cpu_factor.store(factor.to_bits(), Ordering::Relaxed);
    }

    /// Stop every chain, then detach from the device manager.
    pub fn stop(self: &Arc<Self>) {
        if self.running.swap(false, Ordering::SeqCst) {
            {
                let chains = self.chains.lock();
                for chain in chains.iter() {
                    if chain.is_running() {
                        chain.stop();
                    }
                }
            }
            // The chain list lock is released before detaching so this
            // never holds an inner lock while taking the manager's.
            if let Some(device) = self.device.upgrade() {
                device.detach(self);
            }
        }
    }

    /// Record the running state and stop if running.
    pub fn suspend(self: &Arc<Self>) -> bool {
        if self.is_running() {
            self.stop();
            true
        } else {
            false
        }
    }

    /// Restore the state recorded by [`suspend`](Context::suspend).
    pub fn resume(self: &Arc<Self>, state: bool) {
        if state && !self.is_running() {
            self.start();
        } else if !state {
            self.stop();
        }
    }

    /// One block: tick every running chain and record the elapsed time.
    /// Only to be used by the rt thread, via the device manager.
    pub(crate) fn tick(&self) {
        let started = Instant::now();
        {
            let chains = self.chains.lock();
            for chain in chains.iter() {
                if chain.is_running() {
                    chain.tick();
                }
            }
        }
        let micros = started.elapsed().as_secs_f64() * 1e6;
        self.cpu_micros.store(micros.to_bits(), Ordering::Relaxed);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // Arc-held contexts are detached via stop(); by the time drop runs
        // nothing references this context, so just stop the chains.
        let chains = self.chains.lock();
        for chain in chains.iter() {
            if chain.is_running() {
                chain.stop();
            }
        }
    }
}
