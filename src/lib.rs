//! Realtime DSP graph runtime.
//!
//! A [`DeviceManager`] owns audio I/O and the block clock, [`Context`]s
//! group [`Chain`]s under that clock, and each chain is an independent DAG
//! of processing nodes. Compiling a chain topologically sorts its nodes and
//! binds a sample buffer to every edge (fan-in summed, in-place reuse where
//! legal, cycles rejected); the audio callback then ticks the compiled
//! schedule once per block. Edits on a running chain suspend it, apply the
//! change, recompile and resume.
//!
//! ```
//! use sigchain::backend::MockBackend;
//! use sigchain::nodes::{Dac, Sig};
//! use sigchain::{Chain, Context, DeviceManager, Link};
//!
//! let device = DeviceManager::new(Box::new(MockBackend::default()));
//! device.set_vector_size(4);
//!
//! let context = Context::new(&device);
//! context.start();
//! let chain = Chain::new(&context);
//! context.add(&chain);
//!
//! let (sig, _level) = Sig::new(0.5);
//! let sig = chain.insert(Box::new(sig))?;
//! let dac = chain.insert(Box::new(Dac::with_channel_count(1)))?;
//! chain.add_link(Link::new(sig, 0, dac, 0))?;
//! chain.start()?;
//!
//! // Normally driven by the backend once per block:
//! device.tick();
//! # Ok::<(), sigchain::DspError>(())
//! ```

mod buffer;
mod chain;
mod context;
mod device;
mod error;
mod node;
mod port;

pub mod backend;
pub mod nodes;
pub mod signal;

#[cfg(feature = "cpal-backend")]
pub mod cpal_backend;

pub use buffer::{Buffer, BufferClass, BufferId, SharedBuffer};
pub use chain::Chain;
pub use context::Context;
pub use device::{DeviceIo, DeviceManager};
pub use error::DspError;
pub use node::{NodeId, PrepareContext, ProcBuffers, ProcInfo, Processor};
pub use port::Link;
pub use signal::Sample;

pub const SMALLVEC_ALLOC_PORTS: usize = 4;
pub const SMALLVEC_ALLOC_SOURCES: usize = 4;
