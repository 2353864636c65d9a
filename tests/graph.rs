//! End-to-end graph tests: compilation, buffer binding, ticking and online
//! edits, driven through a mock device.

use std::sync::Arc;

use sigchain::backend::MockBackend;
use sigchain::nodes::{Adc, Dac, Monitor, PlusVector, Sig, Times};
use sigchain::{Chain, Context, DeviceManager, DspError, Link, NodeId, Sample};

const VS: usize = 4;

fn rig() -> (Arc<DeviceManager>, Arc<Context>, Arc<Chain>) {
    let device = DeviceManager::new(Box::new(MockBackend::default()));
    device.set_vector_size(VS);
    let context = Context::new(&device);
    context.start();
    let chain = Chain::new(&context);
    context.add(&chain);
    (device, context, chain)
}

/// Run one block with silent input and return the deinterleaved output
/// channels.
fn run_block(device: &DeviceManager) -> Vec<Vec<Sample>> {
    run_block_with_input(device, &vec![0.0; VS * device.num_input_channels()])
}

fn run_block_with_input(device: &DeviceManager, input: &[Sample]) -> Vec<Vec<Sample>> {
    let num_outputs = device.num_output_channels();
    let mut output = vec![0.0; VS * num_outputs];
    device.process_block(input, &mut output);
    (0..num_outputs)
        .map(|ch| output.iter().skip(ch).step_by(num_outputs).copied().collect())
        .collect()
}

fn sig(chain: &Chain, value: Sample) -> NodeId {
    let (node, _) = Sig::new(value);
    chain.insert(Box::new(node)).unwrap()
}

fn position(order: &[NodeId], id: NodeId) -> usize {
    order.iter().position(|n| *n == id).unwrap()
}

// Constant -> gain -> dac.
#[test]
fn linear_chain_produces_the_expected_block() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let (gain, _) = Times::new(2.0);
    let b = chain.insert(Box::new(gain)).unwrap();
    let c = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, b, 0)).unwrap();
    chain.add_link(Link::new(b, 0, c, 0)).unwrap();

    chain.start().unwrap();
    assert!(chain.is_running());

    let out = run_block(&device);
    assert_eq!(out[0], vec![1.0; VS]);
    assert_eq!(out[1], vec![0.0; VS]);
}

// Two producers into one input are summed.
#[test]
fn fan_in_is_summed_into_the_input_buffer() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.25);
    let b = sig(&chain, 0.75);
    let c = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, c, 0)).unwrap();
    chain.add_link(Link::new(b, 0, c, 0)).unwrap();

    chain.start().unwrap();
    let out = run_block(&device);
    assert_eq!(out[0], vec![1.0; VS]);

    let summed = chain.input_buffer(c, 0).unwrap();
    assert_eq!(summed.borrow().to_vec(), vec![1.0; VS]);
}

// A cycle is rejected and the chain stays stopped.
#[test]
fn cycles_are_rejected_with_loop() {
    let (_device, _context, chain) = rig();

    let (x, _) = Times::new(1.0);
    let a = chain.insert(Box::new(x)).unwrap();
    let (y, _) = Times::new(1.0);
    let b = chain.insert(Box::new(y)).unwrap();
    chain.add_link(Link::new(a, 0, b, 0)).unwrap();
    chain.add_link(Link::new(b, 0, a, 0)).unwrap();

    let err = chain.start().unwrap_err();
    assert!(matches!(err, DspError::Loop(n) if n == a || n == b));
    assert!(!chain.is_running());
}

// In-place nodes alias their output to their input; an unconnected
// input makes that impossible.
#[test]
fn inplace_aliases_output_to_input() {
    let (_device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let (gain, _) = Times::new(2.0);
    let g = chain.insert(Box::new(gain)).unwrap();
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, g, 0)).unwrap();
    chain.add_link(Link::new(g, 0, d, 0)).unwrap();

    chain.start().unwrap();
    let input = chain.input_buffer(g, 0).unwrap();
    let output = chain.output_buffer(g, 0).unwrap();
    assert!(input.ptr_eq(&output));
    assert!(!chain.output_is_owned(g, 0));
    assert!(chain.output_is_owned(a, 0));
}

#[test]
fn inplace_with_unconnected_input_fails() {
    let (_device, _context, chain) = rig();

    let (gain, _) = Times::new(2.0);
    let g = chain.insert(Box::new(gain)).unwrap();
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(g, 0, d, 0)).unwrap();

    let err = chain.start().unwrap_err();
    assert_eq!(err, DspError::Inplace(g));
    assert!(!chain.is_running());
}

// Edits on a running chain recompile and the next block reflects them.
#[test]
fn hot_edit_recompiles_and_resumes() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let (gain, _) = Times::new(2.0);
    let b = chain.insert(Box::new(gain)).unwrap();
    let c = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, b, 0)).unwrap();
    chain.add_link(Link::new(b, 0, c, 0)).unwrap();
    chain.start().unwrap();
    assert_eq!(run_block(&device)[0], vec![1.0; VS]);

    let d = sig(&chain, 0.1);
    chain.add_link(Link::new(d, 0, b, 0)).unwrap();

    assert!(chain.is_running());
    let order = chain.nodes();
    assert!(position(&order, d) < position(&order, b));

    let out = run_block(&device);
    let expected = (0.5 + 0.1) * 2.0;
    for s in out[0].iter() {
        assert!((s - expected).abs() < 1e-6);
    }
}

// A producer wired by a link but never added to the chain has no bound
// output, which is a structural break.
#[test]
fn unregistered_producer_fails_with_recopy() {
    let (_device, _context, chain) = rig();

    let (node, _) = Sig::new(0.5);
    let a = chain.create(Box::new(node));
    let b = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, b, 0)).unwrap();

    let err = chain.start().unwrap_err();
    assert_eq!(err, DspError::Recopy(b));
    assert!(!chain.is_running());
}

// The compiled order puts every producer before its consumers.
#[test]
fn compiled_order_is_topological() {
    let (_device, _context, chain) = rig();

    // Diamond: s -> g1, s -> g2, g1 + g2 -> sum -> dac. Inserted in an
    // order that disagrees with the data flow.
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    let m = chain.insert(Box::new(PlusVector::new())).unwrap();
    let (gain1, _) = Times::new(1.0);
    let g1 = chain.insert(Box::new(gain1)).unwrap();
    let (gain2, _) = Times::new(1.0);
    let g2 = chain.insert(Box::new(gain2)).unwrap();
    let s = sig(&chain, 0.5);

    let links = [
        Link::new(s, 0, g1, 0),
        Link::new(s, 0, g2, 0),
        Link::new(g1, 0, m, 0),
        Link::new(g2, 0, m, 1),
        Link::new(m, 0, d, 0),
    ];
    for link in links {
        chain.add_link(link).unwrap();
    }

    chain.start().unwrap();
    let order = chain.nodes();
    for link in links {
        assert!(
            position(&order, link.from_node()) < position(&order, link.to_node()),
            "{:?} not before {:?}",
            link.from_node(),
            link.to_node()
        );
    }
}

// An unconnected input buffer stays all-zero.
#[test]
fn unconnected_input_stays_zero() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0, 1]))).unwrap();
    chain.add_link(Link::new(a, 0, d, 0)).unwrap();

    chain.start().unwrap();
    let out = run_block(&device);
    assert_eq!(out[0], vec![0.5; VS]);
    assert_eq!(out[1], vec![0.0; VS]);

    let unconnected = chain.input_buffer(d, 1).unwrap();
    assert!(unconnected.borrow().iter().all(|s| *s == 0.0));
}

// Adds are idempotent, removals of unknown entities are no-ops.
#[test]
fn edits_are_idempotent() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_node(a).unwrap();
    chain.add_node(d).unwrap();
    assert_eq!(chain.num_nodes(), 2);

    let link = Link::new(a, 0, d, 0);
    chain.add_link(link).unwrap();
    chain.add_link(link).unwrap();
    assert_eq!(chain.num_links(), 1);

    // Unknown removals do nothing.
    chain.remove_link(Link::new(a, 0, d, 0)).unwrap();
    chain.remove_link(Link::new(a, 0, d, 0)).unwrap();
    assert_eq!(chain.num_links(), 0);
    chain.add_link(link).unwrap();

    chain.start().unwrap();
    assert_eq!(run_block(&device)[0], vec![0.5; VS]);

    chain.remove_node(a).unwrap();
    chain.remove_node(a).unwrap();
    assert!(!chain.is_node_alive(a));
    assert_eq!(chain.num_nodes(), 1);
}

// The schedule after online edits equals the schedule of the same
// edits applied offline.
#[test]
fn online_and_offline_edits_agree() {
    let build = |chain: &Chain, online: bool| -> (NodeId, NodeId, NodeId) {
        if online {
            chain.start().unwrap();
        }
        let a = sig(chain, 0.5);
        let (gain, _) = Times::new(2.0);
        let b = chain.insert(Box::new(gain)).unwrap();
        let c = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
        chain.add_link(Link::new(a, 0, b, 0)).unwrap();
        chain.add_link(Link::new(b, 0, c, 0)).unwrap();
        let d = sig(chain, 0.25);
        chain.add_link(Link::new(d, 0, b, 0)).unwrap();
        if !online {
            chain.start().unwrap();
        }
        (a, b, c)
    };

    let (device_on, _ctx_on, online) = rig();
    let trio_on = build(&online, true);
    let (device_off, _ctx_off, offline) = rig();
    let trio_off = build(&offline, false);

    assert!(online.is_running() && offline.is_running());
    assert_eq!(run_block(&device_on), run_block(&device_off));

    // Same relative order of the shared structure.
    let order_on = online.nodes();
    let order_off = offline.nodes();
    assert!(position(&order_on, trio_on.0) < position(&order_on, trio_on.1));
    assert!(position(&order_off, trio_off.0) < position(&order_off, trio_off.1));
    assert!(position(&order_on, trio_on.1) < position(&order_on, trio_on.2));
    assert!(position(&order_off, trio_off.1) < position(&order_off, trio_off.2));
}

#[test]
fn removing_a_link_silences_the_consumer() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    let link = Link::new(a, 0, d, 0);
    chain.add_link(link).unwrap();
    chain.start().unwrap();
    assert_eq!(run_block(&device)[0], vec![0.5; VS]);

    chain.remove_link(link).unwrap();
    assert!(chain.is_running());
    assert_eq!(run_block(&device)[0], vec![0.0; VS]);
}

#[test]
fn removing_a_node_prunes_its_links() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let (gain, _) = Times::new(2.0);
    let b = chain.insert(Box::new(gain)).unwrap();
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, b, 0)).unwrap();
    chain.add_link(Link::new(b, 0, d, 0)).unwrap();
    chain.start().unwrap();
    assert_eq!(run_block(&device)[0], vec![1.0; VS]);

    chain.remove_node(b).unwrap();
    assert!(chain.is_running());
    assert!(!chain.is_node_alive(b));
    assert_eq!(run_block(&device)[0], vec![0.0; VS]);
}

#[test]
fn invalid_links_are_rejected_silently() {
    let (_device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();

    // Self-loop.
    chain.add_link(Link::new(a, 0, a, 0)).unwrap();
    // Out-of-range ports.
    chain.add_link(Link::new(a, 1, d, 0)).unwrap();
    chain.add_link(Link::new(a, 0, d, 7)).unwrap();
    assert_eq!(chain.num_links(), 0);
}

#[test]
fn failed_compile_leaves_the_chain_stopped_until_repaired() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, d, 0)).unwrap();
    chain.start().unwrap();

    // Introduce a cycle while running: the edit fails and the chain stays
    // stopped-but-edited.
    let (x, _) = Times::new(1.0);
    let g = chain.insert(Box::new(x)).unwrap();
    let (y, _) = Times::new(1.0);
    let h = chain.insert(Box::new(y)).unwrap();
    chain.add_link(Link::new(a, 0, g, 0)).unwrap();
    chain.add_link(Link::new(g, 0, h, 0)).unwrap();
    let err = chain.add_link(Link::new(h, 0, g, 0)).unwrap_err();
    assert!(matches!(err, DspError::Loop(_)));
    assert!(!chain.is_running());

    // Removing the offending link does not restart the chain by itself.
    chain.remove_link(Link::new(h, 0, g, 0)).unwrap();
    assert!(!chain.is_running());

    chain.start().unwrap();
    assert!(chain.is_running());
    assert_eq!(run_block(&device)[0], vec![0.5; VS]);
}

#[test]
fn adc_routes_device_input_to_the_graph() {
    let (device, _context, chain) = rig();

    let adc = chain.insert(Box::new(Adc::new(vec![0]))).unwrap();
    let dac = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(adc, 0, dac, 0)).unwrap();
    chain.start().unwrap();

    // Interleaved stereo input, channel 0 = 0.25, channel 1 = 0.9.
    let mut input = vec![0.0; VS * device.num_input_channels()];
    for frame in input.chunks_mut(device.num_input_channels()) {
        frame[0] = 0.25;
        frame[1] = 0.9;
    }
    let out = run_block_with_input(&device, &input);
    assert_eq!(out[0], vec![0.25; VS]);
}

#[test]
fn monitor_taps_the_signal_path() {
    let (device, _context, chain) = rig();

    let a = sig(&chain, 0.5);
    let (monitor, mut handle) = Monitor::new(64, true);
    let m = chain.insert(Box::new(monitor)).unwrap();
    chain.add_link(Link::new(a, 0, m, 0)).unwrap();
    chain.start().unwrap();

    run_block(&device);
    let mut captured = vec![0.0; VS];
    let popped = handle.rx.pop_slice(&mut captured);
    assert_eq!(popped, VS);
    assert_eq!(captured, vec![0.5; VS]);
    assert!(handle.active());
}

#[test]
fn context_reports_cpu_after_a_tick() {
    let (device, context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, d, 0)).unwrap();
    chain.start().unwrap();

    run_block(&device);
    assert!(context.cpu() >= 0.0);
}

#[test]
fn stopping_the_context_stops_its_chains() {
    let (device, context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, d, 0)).unwrap();
    chain.start().unwrap();

    context.stop();
    assert!(!context.is_running());
    assert!(!chain.is_running());
    assert_eq!(device.num_contexts(), 0);

    // A stopped context no longer ticks anything.
    assert_eq!(run_block(&device)[0], vec![0.0; VS]);
}

#[test]
fn device_setters_stop_active_contexts() {
    let (device, context, chain) = rig();

    let a = sig(&chain, 0.5);
    let d = chain.insert(Box::new(Dac::new(vec![0]))).unwrap();
    chain.add_link(Link::new(a, 0, d, 0)).unwrap();
    chain.start().unwrap();

    device.set_sample_rate(48000);
    assert!(!context.is_running());
    assert!(!chain.is_running());
    assert_eq!(device.sample_rate(), 48000);

    // The caller restarts explicitly.
    context.start();
    chain.start().unwrap();
    assert!(chain.is_running());
    assert_eq!(run_block(&device)[0], vec![0.5; VS]);
}
