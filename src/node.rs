use atomic_refcell::{AtomicRef, AtomicRefMut};
use smallvec::SmallVec;

use crate::buffer::{Buffer, SharedBuffer};
use crate::device::DeviceIo;
use crate::port::{Input, Output};
use crate::SMALLVEC_ALLOC_PORTS;

/// Handle to a node slot in a chain's arena.
///
/// Handles are plain values; a handle whose slot has been freed (the node
/// was removed) simply fails to resolve. The generation counter makes a
/// reused slot distinguishable from the node that previously occupied it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node({}.{})", self.index, self.generation)
    }
}

/// Per-block processing information handed to [`Processor::perform`].
#[derive(Debug, Clone, Copy)]
pub struct ProcInfo {
    /// The sample rate of the stream. Constant between compiles.
    pub sample_rate: u32,

    /// The reciprocal of the sample rate (1.0 / sample_rate), provided for
    /// convenience.
    pub sample_rate_recip: f64,

    /// The number of frames in every buffer of this block.
    pub vector_size: usize,
}

/// The buffers bound to a node for one block.
///
/// Buffers are borrowed per access. For an in-place node, output *k* is the
/// same storage as input *k*; read and modify it through the single
/// [`output`](ProcBuffers::output) borrow instead of borrowing both sides,
/// which would be observed as an aliasing violation.
pub struct ProcBuffers<'a> {
    pub(crate) ins: &'a [SharedBuffer],
    pub(crate) outs: &'a [SharedBuffer],
}

impl<'a> ProcBuffers<'a> {
    pub fn num_inputs(&self) -> usize {
        self.ins.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outs.len()
    }

    /// Borrow the summed input buffer at `index`.
    #[inline]
    pub fn input(&self, index: usize) -> Option<AtomicRef<'_, Buffer>> {
        self.ins.get(index).map(|b| b.borrow())
    }

    /// Borrow the output buffer at `index` mutably.
    #[inline]
    pub fn output(&self, index: usize) -> Option<AtomicRefMut<'_, Buffer>> {
        self.outs.get(index).map(|b| b.borrow_mut())
    }
}

/// Configuration surface available to [`Processor::prepare`].
///
/// `prepare` runs once per compile, after the chain has wired its links, so
/// connection queries reflect the graph being compiled. A processor must
/// call [`should_perform`](PrepareContext::should_perform) to take part in
/// the tick; it may call [`set_inplace`](PrepareContext::set_inplace) to
/// control output/input buffer aliasing (on by default).
pub struct PrepareContext<'a> {
    pub(crate) sample_rate: u32,
    pub(crate) vector_size: usize,
    pub(crate) inputs: &'a [Input],
    pub(crate) outputs: &'a [Output],
    pub(crate) device: Option<&'a DeviceIo>,
    pub(crate) inplace: bool,
    pub(crate) perform: bool,
}

impl<'a> PrepareContext<'a> {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn vector_size(&self) -> usize {
        self.vector_size
    }

    pub fn num_inputs(&self) -> usize {
        self.inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.outputs.len()
    }

    /// Whether at least one producer is connected into input `index`.
    pub fn is_input_connected(&self, index: usize) -> bool {
        self.inputs.get(index).map_or(false, |p| p.is_connected())
    }

    /// Whether at least one consumer is connected to output `index`.
    pub fn is_output_connected(&self, index: usize) -> bool {
        self.outputs.get(index).map_or(false, |p| p.is_connected())
    }

    /// The channel buffers of the device driving this chain, if the chain
    /// is attached to one.
    pub fn device(&self) -> Option<&DeviceIo> {
        self.device
    }

    /// Request that output *k* share storage with input *k*.
    pub fn set_inplace(&mut self, inplace: bool) {
        self.inplace = inplace;
    }

    /// Opt in or out of the tick. A node that never calls this stays out of
    /// the schedule and allocates no buffers.
    pub fn should_perform(&mut self, perform: bool) {
        self.perform = perform;
    }
}

/// A signal processor hosted by a chain node.
///
/// The engine calls `prepare` on every compile, `perform` once per block
/// while running, and `release` when the node is stopped.
///
/// `perform` runs on the audio thread: it must not allocate, lock, or
/// otherwise block.
pub trait Processor: Send {
    /// Human-readable name, used in logs.
    fn name(&self) -> &'static str {
        ""
    }

    /// The input arity. Must remain constant for the lifetime of the node.
    fn num_inputs(&self) -> usize;

    /// The output arity. Must remain constant for the lifetime of the node.
    fn num_outputs(&self) -> usize;

    /// Configure for the upcoming run. Sample rate and vector size are
    /// already final when this is called.
    fn prepare(&mut self, ctx: &mut PrepareContext);

    /// Process one block. Input buffers already hold their summed fan-in.
    fn perform(&mut self, info: &ProcInfo, buffers: &mut ProcBuffers);

    /// Free node-local resources on stop. Default no-op.
    fn release(&mut self) {}
}

/// Engine-side state of one node: the processor plus its port set and the
/// compile results (flags, sort index, cached buffer arrays).
pub(crate) struct DspNode {
    pub(crate) processor: Box<dyn Processor>,
    pub(crate) nins: usize,
    pub(crate) nouts: usize,
    pub(crate) inputs: Vec<Input>,
    pub(crate) outputs: Vec<Output>,

    pub(crate) sample_rate: u32,
    pub(crate) vector_size: usize,

    /// Output *k* may share storage with input *k*. On by default, as in
    /// the scalar math nodes that process their aliased output directly.
    pub(crate) inplace: bool,
    pub(crate) running: bool,
    /// Sort index assigned during compilation; 0 means unvisited.
    pub(crate) index: usize,

    in_buffers: SmallVec<[SharedBuffer; SMALLVEC_ALLOC_PORTS]>,
    out_buffers: SmallVec<[SharedBuffer; SMALLVEC_ALLOC_PORTS]>,
}

impl DspNode {
    pub(crate) fn new(processor: Box<dyn Processor>) -> Self {
        let nins = processor.num_inputs();
        let nouts = processor.num_outputs();
        Self {
            processor,
            nins,
            nouts,
            inputs: (0..nins).map(|_| Input::new()).collect(),
            outputs: (0..nouts).map(|_| Output::new()).collect(),
            sample_rate: 0,
            vector_size: 0,
            inplace: true,
            running: false,
            index: 0,
            in_buffers: SmallVec::new(),
            out_buffers: SmallVec::new(),
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.processor.name()
    }

    /// Add `producer` to the set of input `index`. Out-of-range indices are
    /// ignored; indices are validated at link creation.
    pub(crate) fn wire_input(&mut self, producer: NodeId, index: usize) {
        if let Some(input) = self.inputs.get_mut(index) {
            input.add(producer);
        }
    }

    /// Add `consumer` to the set of output `index`. Out-of-range indices
    /// are ignored.
    pub(crate) fn wire_output(&mut self, consumer: NodeId, index: usize) {
        if let Some(output) = self.outputs.get_mut(index) {
            output.add(consumer);
        }
    }

    pub(crate) fn is_input_connected(&self, index: usize) -> bool {
        self.inputs.get(index).map_or(false, |p| p.is_connected())
    }

    pub(crate) fn is_output_connected(&self, index: usize) -> bool {
        self.outputs.get(index).map_or(false, |p| p.is_connected())
    }

    /// Run the processor's `prepare` hook and fold its decisions back into
    /// the node flags.
    pub(crate) fn prepare(&mut self, device: Option<&DeviceIo>) {
        let mut ctx = PrepareContext {
            sample_rate: self.sample_rate,
            vector_size: self.vector_size,
            inputs: &self.inputs,
            outputs: &self.outputs,
            device,
            inplace: self.inplace,
            perform: false,
        };
        self.processor.prepare(&mut ctx);
        self.inplace = ctx.inplace;
        self.running = ctx.perform;
    }

    /// Snapshot port buffers into the flat arrays used at tick time. Every
    /// started port has a buffer, so the arrays line up with port indices.
    pub(crate) fn cache_buffers(&mut self) {
        self.in_buffers = self.inputs.iter().filter_map(|p| p.buffer()).collect();
        self.out_buffers = self.outputs.iter().filter_map(|p| p.buffer()).collect();
        debug_assert_eq!(self.in_buffers.len(), self.nins);
        debug_assert_eq!(self.out_buffers.len(), self.nouts);
    }

    /// One block: sum the fan-in of every input, then run the processor.
    /// Only to be used by the rt thread, via the chain's tick.
    pub(crate) fn tick(&mut self) {
        for input in self.inputs.iter_mut() {
            input.perform();
        }

        let info = ProcInfo {
            sample_rate: self.sample_rate,
            sample_rate_recip: if self.sample_rate == 0 {
                0.0
            } else {
                1.0 / f64::from(self.sample_rate)
            },
            vector_size: self.vector_size,
        };
        let mut buffers = ProcBuffers {
            ins: &self.in_buffers,
            outs: &self.out_buffers,
        };
        self.processor.perform(&info, &mut buffers);
    }

    /// Leave the schedule: clear the running flag, run the `release` hook
    /// and drop every port binding.
    pub(crate) fn stop(&mut self) {
        self.running = false;
        self.processor.release();
        for input in self.inputs.iter_mut() {
            input.clear();
        }
        for output in self.outputs.iter_mut() {
            output.clear();
        }
        self.in_buffers.clear();
        self.out_buffers.clear();
    }
}
