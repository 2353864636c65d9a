//! Randomized compilation properties: forward-edge graphs always compile
//! into a topological schedule, and any ring of links is rejected.

use std::sync::Arc;

use proptest::prelude::*;

use sigchain::backend::MockBackend;
use sigchain::{
    Chain, Context, DeviceManager, DspError, Link, NodeId, PrepareContext, ProcBuffers, ProcInfo,
    Processor,
};

const PORTS: usize = 4;

/// Inert node with a fixed arity; never processes in place so unconnected
/// inputs are fine.
struct Pass;

impl Processor for Pass {
    fn name(&self) -> &'static str {
        "pass"
    }
    fn num_inputs(&self) -> usize {
        PORTS
    }
    fn num_outputs(&self) -> usize {
        PORTS
    }
    fn prepare(&mut self, ctx: &mut PrepareContext) {
        ctx.set_inplace(false);
        ctx.should_perform(true);
    }
    fn perform(&mut self, _info: &ProcInfo, _buffers: &mut ProcBuffers) {}
}

fn rig() -> (Arc<DeviceManager>, Arc<Context>, Arc<Chain>) {
    let device = DeviceManager::new(Box::new(MockBackend::default()));
    device.set_vector_size(4);
    let context = Context::new(&device);
    context.start();
    let chain = Chain::new(&context);
    context.add(&chain);
    (device, context, chain)
}

fn position(order: &[NodeId], id: NodeId) -> usize {
    order.iter().position(|n| *n == id).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Graphs whose links all point from a lower to a higher node index are
    /// acyclic by construction; they compile, and the compiled order puts
    /// every producer before its consumers.
    #[test]
    fn forward_graphs_compile_topologically(
        n in 2usize..8,
        raw_edges in prop::collection::vec(
            (0usize..64, 0usize..64, 0usize..PORTS, 0usize..PORTS),
            0..24,
        ),
    ) {
        let (_device, _context, chain) = rig();
        let ids: Vec<NodeId> = (0..n)
            .map(|_| chain.insert(Box::new(Pass)).unwrap())
            .collect();

        let mut used = Vec::new();
        for (x, y, out_port, in_port) in raw_edges {
            let (a, b) = (x % n, y % n);
            let (a, b) = (a.min(b), a.max(b));
            if a == b {
                continue;
            }
            chain.add_link(Link::new(ids[a], out_port, ids[b], in_port)).unwrap();
            used.push((a, b));
        }

        prop_assert!(chain.start().is_ok());
        let order = chain.nodes();
        for (a, b) in used {
            prop_assert!(position(&order, ids[a]) < position(&order, ids[b]));
        }
    }

    /// A ring of links through every node is always rejected with `Loop`,
    /// regardless of any extra forward edges.
    #[test]
    fn rings_are_rejected(
        n in 2usize..8,
        extra in prop::collection::vec((0usize..64, 0usize..64), 0..8),
    ) {
        let (_device, _context, chain) = rig();
        let ids: Vec<NodeId> = (0..n)
            .map(|_| chain.insert(Box::new(Pass)).unwrap())
            .collect();

        for i in 0..n {
            chain.add_link(Link::new(ids[i], 0, ids[(i + 1) % n], 0)).unwrap();
        }
        for (x, y) in extra {
            let (a, b) = (x % n, y % n);
            if a < b {
                chain.add_link(Link::new(ids[a], 1, ids[b], 1)).unwrap();
            }
        }

        let err = chain.start().unwrap_err();
        prop_assert!(matches!(err, DspError::Loop(_)));
        prop_assert!(!chain.is_running());
    }
}
