use basedrop::Handle;
use smallvec::SmallVec;

use crate::buffer::{Buffer, BufferClass, BufferId, SharedBuffer};
use crate::error::DspError;
use crate::node::NodeId;
use crate::signal;
use crate::{SMALLVEC_ALLOC_PORTS, SMALLVEC_ALLOC_SOURCES};

pub(crate) type NodeSet = SmallVec<[NodeId; SMALLVEC_ALLOC_PORTS]>;
pub(crate) type SourceList = SmallVec<[SharedBuffer; SMALLVEC_ALLOC_SOURCES]>;

/// One output of a node: the consumer set and the sample buffer the node
/// writes into.
///
/// The buffer is either owned (allocated for this port) or borrowed (an
/// alias of the same node's input at the same index, for in-place
/// processing). Exactly one of the two holds while the node runs; neither
/// while it is stopped.
pub(crate) struct Output {
    links: NodeSet,
    buffer: Option<SharedBuffer>,
    owned: bool,
}

impl Output {
    pub(crate) fn new() -> Self {
        Self {
            links: NodeSet::new(),
            buffer: None,
            owned: false,
        }
    }

    /// Add `consumer` to the set, deduplicated. Insertion order is kept so
    /// downstream iteration stays deterministic.
    pub(crate) fn add(&mut self, consumer: NodeId) {
        if !self.links.contains(&consumer) {
            self.links.push(consumer);
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }

    pub(crate) fn has_consumer(&self, consumer: NodeId) -> bool {
        self.links.contains(&consumer)
    }

    pub(crate) fn buffer(&self) -> Option<SharedBuffer> {
        self.buffer.clone()
    }

    /// Whether the bound buffer was allocated for this port, as opposed to
    /// borrowed from the owner's input for in-place processing.
    pub(crate) fn is_owned(&self) -> bool {
        self.owned
    }

    pub(crate) fn clear_links(&mut self) {
        self.links.clear();
    }

    /// Bind the output for a run. `borrow` carries the aliased input buffer
    /// when the owner processes in place; otherwise a fresh zeroed buffer
    /// is allocated.
    pub(crate) fn start(
        &mut self,
        owner: NodeId,
        port: usize,
        borrow: Option<SharedBuffer>,
        vector_size: usize,
        coll_handle: &Handle,
    ) -> Result<(), DspError> {
        self.buffer = None;
        self.owned = false;

        match borrow {
            Some(buffer) => {
                self.buffer = Some(buffer);
            }
            None => {
                let id = BufferId {
                    class: BufferClass::NodeOut,
                    owner: owner.index,
                    port: port as u32,
                };
                let buffer = Buffer::try_alloc(vector_size).ok_or(DspError::Alloc(owner))?;
                self.buffer = Some(SharedBuffer::new(buffer, id, coll_handle));
                self.owned = true;
            }
        }
        Ok(())
    }

    /// Drop the consumer set and the buffer binding.
    pub(crate) fn clear(&mut self) {
        self.links.clear();
        self.buffer = None;
        self.owned = false;
    }
}

/// One input of a node: the producer set, the owned buffer the fan-in is
/// summed into, and the source buffers resolved at compile time.
pub(crate) struct Input {
    links: NodeSet,
    buffer: Option<SharedBuffer>,
    sources: SourceList,
}

impl Input {
    pub(crate) fn new() -> Self {
        Self {
            links: NodeSet::new(),
            buffer: None,
            sources: SourceList::new(),
        }
    }

    pub(crate) fn add(&mut self, producer: NodeId) {
        if !self.links.contains(&producer) {
            self.links.push(producer);
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        !self.links.is_empty()
    }

    pub(crate) fn producers(&self) -> &[NodeId] {
        &self.links
    }

    pub(crate) fn buffer(&self) -> Option<SharedBuffer> {
        self.buffer.clone()
    }

    pub(crate) fn clear_links(&mut self) {
        self.links.clear();
    }

    /// Bind the input for a run: keep the surviving producers, record their
    /// resolved source buffers and allocate the owned buffer the fan-in is
    /// summed into.
    pub(crate) fn start(
        &mut self,
        owner: NodeId,
        port: usize,
        alive: NodeSet,
        sources: SourceList,
        vector_size: usize,
        coll_handle: &Handle,
    ) -> Result<(), DspError> {
        self.buffer = None;
        self.sources.clear();

        self.links = alive;
        self.sources = sources;

        let id = BufferId {
            class: BufferClass::NodeIn,
            owner: owner.index,
            port: port as u32,
        };
        let buffer = Buffer::try_alloc(vector_size).ok_or(DspError::Alloc(owner))?;
        self.buffer = Some(SharedBuffer::new(buffer, id, coll_handle));
        Ok(())
    }

    /// Sum the fan-in into the owned buffer. Called each tick before the
    /// owner's perform.
    ///
    /// With no sources the buffer is left untouched (it stays zero from the
    /// bind); one source is a copy; more are a copy plus adds in producer
    /// order.
    #[inline]
    pub(crate) fn perform(&mut self) {
        let Some(buffer) = &self.buffer else {
            return;
        };
        if self.sources.is_empty() {
            return;
        }

        let mut dst = buffer.borrow_mut();
        {
            let first = self.sources[0].borrow();
            signal::vcopy(&first, &mut dst);
        }
        for source in self.sources[1..].iter() {
            let src = source.borrow();
            signal::vadd(&src, &mut dst);
        }
    }

    /// Drop the producer set, the cached sources and the buffer.
    pub(crate) fn clear(&mut self) {
        self.links.clear();
        self.sources.clear();
        self.buffer = None;
    }
}

/// A directed edge from one node's output to another node's input.
///
/// Links are immutable values; a chain keeps the set of links it was given
/// and re-wires the port sets from it on every compile.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Link {
    from: NodeId,
    output: usize,
    to: NodeId,
    input: usize,
}

impl Link {
    pub fn new(from: NodeId, output: usize, to: NodeId, input: usize) -> Self {
        Self {
            from,
            output,
            to,
            input,
        }
    }

    pub fn from_node(&self) -> NodeId {
        self.from
    }

    pub fn output_index(&self) -> usize {
        self.output
    }

    pub fn to_node(&self) -> NodeId {
        self.to
    }

    pub fn input_index(&self) -> usize {
        self.input
    }
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?}:{} -> {:?}:{}",
            self.from, self.output, self.to, self.input
        )
    }
}
