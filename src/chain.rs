use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use basedrop::Handle;
use fnv::FnvHashSet;
use parking_lot::Mutex;

use crate::context::Context;
use crate::device::DeviceIo;
use crate::error::DspError;
use crate::node::{DspNode, NodeId, Processor};
use crate::port::{Link, NodeSet, SourceList};
use crate::buffer::SharedBuffer;

/// An independent DAG of nodes and links, compiled into a schedule and
/// ticked by its context.
///
/// A chain owns its nodes: [`create`](Chain::create) allocates storage,
/// [`add_node`](Chain::add_node) makes a node part of the graph, and
/// [`remove_node`](Chain::remove_node) destroys it. Edits on a running
/// chain suspend it, apply the change, recompile and resume, so the audio
/// thread never observes a half-applied edit.
pub struct Chain {
    context: Weak<Context>,
    graph: Mutex<ChainGraph>,
    running: AtomicBool,
}

struct Slot {
    generation: u32,
    node: Option<DspNode>,
}

struct ChainGraph {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Insertion-ordered membership; re-sorted into topological order by a
    /// successful compile, so tick order equals the compiled order.
    members: Vec<NodeId>,
    links: Vec<Link>,
}

impl ChainGraph {
    fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            members: Vec::new(),
            links: Vec::new(),
        }
    }

    fn create(&mut self, processor: Box<dyn Processor>) -> NodeId {
        let node = DspNode::new(processor);
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.node = Some(node);
                NodeId {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    node: Some(node),
                });
                NodeId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Free the slot and bump its generation so stale handles fail to
    /// resolve. Returns whether the node was alive.
    fn destroy(&mut self, id: NodeId) -> bool {
        match self.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.node.is_some() => {
                slot.node = None;
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(id.index);
                true
            }
            _ => false,
        }
    }

    fn node(&self, id: NodeId) -> Option<&DspNode> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_ref())
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut DspNode> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.node.as_mut())
    }

    fn link_is_valid(&self, link: &Link) -> bool {
        if link.from_node() == link.to_node() {
            return false;
        }
        let (Some(from), Some(to)) = (self.node(link.from_node()), self.node(link.to_node()))
        else {
            return false;
        };
        link.output_index() < from.nouts && link.input_index() < to.nins
    }

    /// Compile step 1: reify the producer/consumer sets inside ports from
    /// the link list. Member port sets are cleared first so wiring left by
    /// a failed compile cannot survive a link removal.
    fn rewire(&mut self) {
        for i in 0..self.members.len() {
            let id = self.members[i];
            if let Some(node) = self.node_mut(id) {
                for input in node.inputs.iter_mut() {
                    input.clear_links();
                }
                for output in node.outputs.iter_mut() {
                    output.clear_links();
                }
            }
        }

        for i in 0..self.links.len() {
            let link = self.links[i];
            if self.node(link.from_node()).is_none() || self.node(link.to_node()).is_none() {
                continue;
            }
            if let Some(from) = self.node_mut(link.from_node()) {
                from.wire_output(link.to_node(), link.output_index());
            }
            if let Some(to) = self.node_mut(link.to_node()) {
                to.wire_input(link.from_node(), link.input_index());
            }
        }
    }

    /// Compile step 2: depth-first topological sort with cycle detection.
    /// On success every reachable node carries a positive sort index with
    /// producers numbered before consumers, and the membership vector is
    /// ordered by index.
    fn sort(&mut self) -> Result<(), DspError> {
        for i in 0..self.members.len() {
            let id = self.members[i];
            if let Some(node) = self.node_mut(id) {
                node.index = 0;
            }
        }

        let mut next = 1usize;
        let mut on_path: FnvHashSet<NodeId> = FnvHashSet::default();
        for i in 0..self.members.len() {
            let id = self.members[i];
            self.sort_visit(id, &mut next, &mut on_path)?;
        }

        let ChainGraph { slots, members, .. } = self;
        members.sort_by_key(|id| {
            slots
                .get(id.index as usize)
                .filter(|slot| slot.generation == id.generation)
                .and_then(|slot| slot.node.as_ref())
                .map(|node| node.index)
                .unwrap_or(usize::MAX)
        });
        Ok(())
    }

    fn sort_visit(
        &mut self,
        id: NodeId,
        next: &mut usize,
        on_path: &mut FnvHashSet<NodeId>,
    ) -> Result<(), DspError> {
        let producers: Vec<NodeId> = {
            let Some(node) = self.node(id) else {
                return Ok(());
            };
            if node.index != 0 {
                return Ok(());
            }
            node.inputs
                .iter()
                .flat_map(|input| input.producers().iter().copied())
                .collect()
        };

        on_path.insert(id);
        for producer in producers {
            let unvisited = self
                .node(producer)
                .map_or(false, |node| node.index == 0);
            if unvisited {
                if on_path.contains(&producer) {
                    return Err(DspError::Loop(producer));
                }
                self.sort_visit(producer, next, on_path)?;
            }
        }
        on_path.remove(&id);

        if let Some(node) = self.node_mut(id) {
            node.index = *next;
            *next += 1;
        }
        Ok(())
    }

    /// Compile step 3, per node: run `prepare`, then bind input and output
    /// buffers. Any port error clears the node's running flag and aborts
    /// the compile.
    fn start_node(
        &mut self,
        id: NodeId,
        sample_rate: u32,
        vector_size: usize,
        coll_handle: &Handle,
        device: Option<&DeviceIo>,
    ) -> Result<(), DspError> {
        {
            let Some(node) = self.node_mut(id) else {
                return Ok(());
            };
            if node.running {
                node.stop();
            }
            node.sample_rate = sample_rate;
            node.vector_size = vector_size;
            node.prepare(device);
            if !node.running {
                return Ok(());
            }
        }

        match self.bind_node(id, vector_size, coll_handle) {
            Ok(()) => Ok(()),
            Err(err) => {
                if let Some(node) = self.node_mut(id) {
                    node.running = false;
                }
                Err(err)
            }
        }
    }

    fn bind_node(
        &mut self,
        id: NodeId,
        vector_size: usize,
        coll_handle: &Handle,
    ) -> Result<(), DspError> {
        // Resolve sources first: for every surviving producer there must be
        // an output that lists this node and already carries a buffer.
        // Producers are bound earlier in the compiled order, so a missing
        // buffer means the link is structurally broken.
        let producer_sets: Vec<NodeSet> = {
            let Some(node) = self.node(id) else {
                return Ok(());
            };
            node.inputs
                .iter()
                .map(|input| NodeSet::from_slice(input.producers()))
                .collect()
        };

        let mut resolved: Vec<(NodeSet, SourceList)> = Vec::with_capacity(producer_sets.len());
        for producers in producer_sets.iter() {
            let mut alive = NodeSet::new();
            let mut sources = SourceList::new();
            for &producer in producers.iter() {
                let Some(producer_node) = self.node(producer) else {
                    // Dead producers are pruned.
                    continue;
                };
                alive.push(producer);
                let buffer = producer_node
                    .outputs
                    .iter()
                    .find(|output| output.has_consumer(id))
                    .and_then(|output| output.buffer());
                match buffer {
                    Some(buffer) => sources.push(buffer),
                    None => return Err(DspError::Recopy(id)),
                }
            }
            resolved.push((alive, sources));
        }

        let Some(node) = self.node_mut(id) else {
            return Ok(());
        };
        for (port, (alive, sources)) in resolved.into_iter().enumerate() {
            node.inputs[port].start(id, port, alive, sources, vector_size, coll_handle)?;
        }
        for port in 0..node.nouts {
            let borrow = if node.inplace && port < node.nins {
                match node.inputs[port].buffer() {
                    Some(buffer) if node.inputs[port].is_connected() => Some(buffer),
                    _ => return Err(DspError::Inplace(id)),
                }
            } else {
                None
            };
            node.outputs[port].start(id, port, borrow, vector_size, coll_handle)?;
        }
        node.cache_buffers();
        Ok(())
    }

    /// Sanity-check the committed schedule: unique positive sort indices in
    /// ascending member order, producers before consumers.
    fn verify_schedule(&self) {
        let mut seen: FnvHashSet<usize> = FnvHashSet::default();
        let mut last = 0usize;
        for &id in self.members.iter() {
            let Some(node) = self.node(id) else {
                continue;
            };
            if node.index == 0 || !seen.insert(node.index) || node.index < last {
                log::error!("schedule error: node {:?} has sort index {}", id, node.index);
                debug_assert!(false, "schedule error: node {:?} has sort index {}", id, node.index);
            }
            last = node.index;

            for input in node.inputs.iter() {
                for &producer in input.producers() {
                    if let Some(producer_node) = self.node(producer) {
                        if producer_node.index != 0 && producer_node.index >= node.index {
                            log::error!(
                                "schedule error: producer {:?} does not precede {:?}",
                                producer,
                                id
                            );
                            debug_assert!(
                                false,
                                "schedule error: producer does not precede consumer"
                            );
                        }
                    }
                }
            }
        }
    }
}

impl Chain {
    /// Create an empty chain under `context`. The chain joins the context's
    /// tick via [`Context::add`].
    pub fn new(context: &Arc<Context>) -> Arc<Chain> {
        Arc::new(Chain {
            context: Arc::downgrade(context),
            graph: Mutex::new(ChainGraph::new()),
            running: AtomicBool::new(false),
        })
    }

    pub fn context(&self) -> Option<Arc<Context>> {
        self.context.upgrade()
    }

    /// The sample rate of the device driving this chain, or 0 if detached.
    pub fn sample_rate(&self) -> u32 {
        self.context.upgrade().map_or(0, |c| c.sample_rate())
    }

    /// The vector size of the device driving this chain, or 0 if detached.
    pub fn vector_size(&self) -> usize {
        self.context.upgrade().map_or(0, |c| c.vector_size())
    }

    /// Whether the chain is compiled and ticking.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn num_nodes(&self) -> usize {
        self.graph.lock().members.len()
    }

    pub fn num_links(&self) -> usize {
        self.graph.lock().links.len()
    }

    /// Allocate a node in the chain's arena without making it part of the
    /// graph. The returned handle stays valid until the node is removed.
    pub fn create(&self, processor: Box<dyn Processor>) -> NodeId {
        let mut graph = self.graph.lock();
        let id = graph.create(processor);
        log::debug!(
            "created node {:?} ({})",
            id,
            graph.node(id).map(|n| n.name()).unwrap_or("")
        );
        id
    }

    /// Make `node` part of the graph. Adding a node twice is a no-op.
    pub fn add_node(&self, node: NodeId) -> Result<(), DspError> {
        let state = self.suspend();
        {
            let mut graph = self.graph.lock();
            if graph.node(node).is_some() && !graph.members.contains(&node) {
                graph.members.push(node);
                log::debug!("added node {:?} to chain", node);
            }
        }
        self.resume(state)
    }

    /// Create and add in one step.
    pub fn insert(&self, processor: Box<dyn Processor>) -> Result<NodeId, DspError> {
        let id = self.create(processor);
        self.add_node(id)?;
        Ok(id)
    }

    /// Remove `node` from the graph and destroy it. Links referencing it
    /// become inert and its handle goes stale. Removing an unknown node is
    /// a no-op.
    pub fn remove_node(&self, node: NodeId) -> Result<(), DspError> {
        let state = self.suspend();
        {
            let mut graph = self.graph.lock();
            if let Some(position) = graph.members.iter().position(|m| *m == node) {
                graph.members.remove(position);
            }
            if graph.destroy(node) {
                log::debug!("removed node {:?} from chain", node);
            }
        }
        self.resume(state)
    }

    /// Add a link. Invalid links (same endpoints, dead nodes, out-of-range
    /// indices) are rejected silently; adding a link twice is a no-op.
    pub fn add_link(&self, link: Link) -> Result<(), DspError> {
        if !self.graph.lock().link_is_valid(&link) {
            log::warn!("rejected invalid link {:?}", link);
            return Ok(());
        }
        let state = self.suspend();
        {
            let mut graph = self.graph.lock();
            if graph.link_is_valid(&link) && !graph.links.contains(&link) {
                graph.links.push(link);
                log::debug!("added link {:?}", link);
            }
        }
        self.resume(state)
    }

    /// Remove a link by value. Removing an unknown link is a no-op.
    pub fn remove_link(&self, link: Link) -> Result<(), DspError> {
        let state = self.suspend();
        {
            let mut graph = self.graph.lock();
            if let Some(position) = graph.links.iter().position(|l| *l == link) {
                graph.links.remove(position);
                log::debug!("removed link {:?}", link);
            }
        }
        self.resume(state)
    }

    /// Compile the chain: wire links into ports, sort with cycle detection,
    /// bind buffers in compiled order, then start ticking.
    ///
    /// On failure the chain stays stopped and the error names the offending
    /// node; already-bound state is reclaimed by the next `stop` or compile.
    pub fn start(&self) -> Result<(), DspError> {
        if self.is_running() {
            self.stop();
        }

        let Some(context) = self.context.upgrade() else {
            log::warn!("chain start ignored: context is gone");
            return Ok(());
        };
        let Some(device) = context.device_manager() else {
            log::warn!("chain start ignored: context has no device manager");
            return Ok(());
        };
        let sample_rate = device.sample_rate();
        let vector_size = device.vector_size();
        let coll_handle = device.collector_handle();
        let device_io = device.io_buffers();

        let mut graph = self.graph.lock();

        graph.rewire();
        graph.sort()?;

        let order = graph.members.clone();
        for id in order {
            graph.start_node(id, sample_rate, vector_size, &coll_handle, Some(&device_io))?;
        }

        graph.verify_schedule();

        self.running.store(true, Ordering::SeqCst);
        log::debug!(
            "compiled chain: {} nodes, {} links, sr {} Hz, vs {}",
            graph.members.len(),
            graph.links.len(),
            sample_rate,
            vector_size
        );
        Ok(())
    }

    /// Stop ticking and release every node's bindings.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            let mut graph = self.graph.lock();
            for i in 0..graph.members.len() {
                let id = graph.members[i];
                if let Some(node) = graph.node_mut(id) {
                    node.stop();
                }
            }
        }
    }

    /// Atomically record the running state and stop if running. Pair with
    /// [`resume`](Chain::resume) around an edit.
    pub fn suspend(&self) -> bool {
        if self.is_running() {
            self.stop();
            true
        } else {
            false
        }
    }

    /// Restore the state recorded by [`suspend`](Chain::suspend),
    /// recompiling if the chain was running.
    pub fn resume(&self, state: bool) -> Result<(), DspError> {
        if state && !self.is_running() {
            self.start()
        } else {
            if !state {
                self.stop();
            }
            Ok(())
        }
    }

    /// One block: tick every running node in compiled order. Holds the
    /// graph mutex for the whole pass. Only to be used by the rt thread,
    /// via the context.
    pub(crate) fn tick(&self) {
        let mut graph = self.graph.lock();
        let ChainGraph { slots, members, .. } = &mut *graph;
        for id in members.iter() {
            let Some(slot) = slots.get_mut(id.index as usize) else {
                continue;
            };
            if slot.generation != id.generation {
                continue;
            }
            if let Some(node) = slot.node.as_mut() {
                if node.running {
                    node.tick();
                }
            }
        }
    }

    /// Whether `node` is alive in this chain's arena.
    pub fn is_node_alive(&self, node: NodeId) -> bool {
        self.graph.lock().node(node).is_some()
    }

    /// Whether `node` took part in the last compile.
    pub fn is_node_running(&self, node: NodeId) -> bool {
        self.graph.lock().node(node).map_or(false, |n| n.running)
    }

    pub fn node_name(&self, node: NodeId) -> Option<&'static str> {
        self.graph.lock().node(node).map(|n| n.name())
    }

    pub fn is_input_connected(&self, node: NodeId, index: usize) -> bool {
        self.graph
            .lock()
            .node(node)
            .map_or(false, |n| n.is_input_connected(index))
    }

    pub fn is_output_connected(&self, node: NodeId, index: usize) -> bool {
        self.graph
            .lock()
            .node(node)
            .map_or(false, |n| n.is_output_connected(index))
    }

    /// The buffer bound to an input port, while the node runs.
    pub fn input_buffer(&self, node: NodeId, index: usize) -> Option<SharedBuffer> {
        self.graph
            .lock()
            .node(node)
            .and_then(|n| n.inputs.get(index))
            .and_then(|p| p.buffer())
    }

    /// The buffer bound to an output port, while the node runs.
    pub fn output_buffer(&self, node: NodeId, index: usize) -> Option<SharedBuffer> {
        self.graph
            .lock()
            .node(node)
            .and_then(|n| n.outputs.get(index))
            .and_then(|p| p.buffer())
    }

    /// Whether output `index` of `node` owns its buffer. False while the
    /// buffer is borrowed from the paired input for in-place processing,
    /// and false when the node is stopped.
    pub fn output_is_owned(&self, node: NodeId, index: usize) -> bool {
        self.graph
            .lock()
            .node(node)
            .and_then(|n| n.outputs.get(index))
            .map_or(false, |p| p.is_owned())
    }

    /// Membership in tick order: insertion order before a compile,
    /// topological order after.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.graph.lock().members.clone()
    }
}

impl Drop for Chain {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{PrepareContext, ProcBuffers, ProcInfo};

    struct Probe;

    impl Processor for Probe {
        fn name(&self) -> &'static str {
            "probe"
        }
        fn num_inputs(&self) -> usize {
            1
        }
        fn num_outputs(&self) -> usize {
            1
        }
        fn prepare(&mut self, ctx: &mut PrepareContext) {
            ctx.should_perform(true);
        }
        fn perform(&mut self, _info: &ProcInfo, _buffers: &mut ProcBuffers) {}
    }

    #[test]
    fn arena_generations_go_stale() {
        let mut graph = ChainGraph::new();
        let a = graph.create(Box::new(Probe));
        assert!(graph.node(a).is_some());
        assert!(graph.destroy(a));
        assert!(graph.node(a).is_none());
        assert!(!graph.destroy(a));

        // The freed slot is reused under a new generation.
        let b = graph.create(Box::new(Probe));
        assert_eq!(a.index, b.index);
        assert_ne!(a.generation, b.generation);
        assert!(graph.node(a).is_none());
        assert!(graph.node(b).is_some());
    }

    #[test]
    fn sort_orders_producers_first() {
        let mut graph = ChainGraph::new();
        let a = graph.create(Box::new(Probe));
        let b = graph.create(Box::new(Probe));
        let c = graph.create(Box::new(Probe));
        // Insert in reverse so insertion order disagrees with data flow.
        graph.members.extend([c, b, a]);
        graph.links.push(Link::new(a, 0, b, 0));
        graph.links.push(Link::new(b, 0, c, 0));

        graph.rewire();
        graph.sort().unwrap();
        assert_eq!(graph.members, vec![a, b, c]);
    }

    #[test]
    fn sort_rejects_cycles() {
        let mut graph = ChainGraph::new();
        let a = graph.create(Box::new(Probe));
        let b = graph.create(Box::new(Probe));
        graph.members.extend([a, b]);
        graph.links.push(Link::new(a, 0, b, 0));
        graph.links.push(Link::new(b, 0, a, 0));

        graph.rewire();
        let err = graph.sort().unwrap_err();
        assert!(matches!(err, DspError::Loop(n) if n == a || n == b));
    }
}
