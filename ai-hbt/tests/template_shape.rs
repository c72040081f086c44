use std::sync::Arc;
use std::thread;

use ai_hbt::{
    BehaviorTree, BtError, CompileConfig, Conditional, ConditionalSpec, NodeKind, NodeSpec,
    Service, ServiceSpec, Span, State, StateSpec, Template,
};

#[derive(Debug, Default)]
struct World {
    ticks: u32,
}

#[derive(Debug, Default)]
struct Work {
    done: u8,
}

impl State<World, ()> for Work {
    fn update(&mut self, world: &mut World, _context: &mut ()) -> bool {
        world.ticks += 1;
        self.done = self.done.wrapping_add(1);
        true
    }
}

#[derive(Debug, Default)]
struct Ready;

impl Conditional<World, ()> for Ready {
    fn check(&mut self, _world: &World, _context: &()) -> bool {
        true
    }
}

#[derive(Debug, Default)]
struct Beacon {
    _pulse: u64,
}

impl Service<World, ()> for Beacon {}

fn work(name: &'static str) -> NodeSpec<World, ()> {
    NodeSpec::leaf(StateSpec::of::<Work>().named(name))
}

fn patrol() -> NodeSpec<World, ()> {
    let beacon = ServiceSpec::of::<Beacon>().named("Beacon");
    NodeSpec::select()
        .conditional(ConditionalSpec::of::<Ready>().named("Ready").continuous())
        .child(
            NodeSpec::sequence()
                .child(work("A"))
                .child(work("B").service(beacon)),
        )
        .child(
            NodeSpec::random()
                .weighted_child(3, work("C"))
                .child(work("D")),
        )
}

#[test]
fn equivalent_specs_compile_to_identical_shapes() {
    let first = Template::compile(&patrol()).unwrap();
    let second = Template::compile(&patrol()).unwrap();

    assert_eq!(first.shape(), second.shape());
    assert_eq!(first.node_count(), 7);
    assert_eq!(first.leaf_count(), 4);
    assert_eq!(first.block_layout(), second.block_layout());
}

#[test]
fn compiled_arrays_follow_preorder() {
    let template = Template::compile(&patrol()).unwrap();

    let kinds: Vec<NodeKind> = template.nodes().iter().map(|n| n.kind).collect();
    assert_eq!(
        kinds,
        [
            NodeKind::Select,
            NodeKind::Sequence,
            NodeKind::Leaf,
            NodeKind::Leaf,
            NodeKind::Random,
            NodeKind::Leaf,
            NodeKind::Leaf,
        ]
    );
    assert_eq!(template.children(0), &[1, 4]);
    assert_eq!(template.children(1), &[2, 3]);
    assert_eq!(template.weights(4), Some(&[3, 100][..]));
    assert_eq!(template.weights(1), None);

    let leaves = template.leaves();
    assert_eq!(leaves[0].next_in_sequence, Some(3));
    assert!(leaves[1..].iter().all(|leaf| leaf.next_in_sequence.is_none()));
    for leaf in leaves {
        assert_eq!(leaf.entry.len(), 1);
        assert_eq!(leaf.continuous.len(), 1);
        assert!(leaf.preempt.is_empty());
    }
    assert_eq!(leaves[1].services.len(), 1);
    assert_eq!(leaves[0].services, Span::new(0, 0));
}

#[test]
fn display_shows_indices_and_links() {
    let template = Template::compile(&patrol()).unwrap();
    let expected = "\
- (0) Select
|   (0) Conditional (Ready) [continuous]
  - (1) Sequence
    - (2) Leaf (0) (A) -> (3)
    - (3) Leaf (1) (B)
    |   (0) Service (Beacon)
  - (4) Random [3, 100]
    - (5) Leaf (2) (C)
    - (6) Leaf (3) (D)
";
    assert_eq!(template.to_string(), expected);
}

#[test]
fn shared_subtree_is_compiled_once_per_reference() {
    let shared = Arc::new(NodeSpec::sequence().child(work("A")).child(work("B")));
    let spec = NodeSpec::select().child_ref(&shared).child_ref(&shared);

    let template = Template::compile(&spec).unwrap();
    assert_eq!(template.leaf_count(), 4);

    let offsets: Vec<usize> = template.states().iter().map(|s| s.offset()).collect();
    let mut distinct = offsets.clone();
    distinct.dedup();
    assert_eq!(distinct.len(), offsets.len());
    // The specification is only read.
    assert_eq!(shared.children().len(), 2);
}

#[test]
fn components_are_laid_out_aligned_and_disjoint() {
    let template = Template::compile(&patrol()).unwrap();
    let layout = template.block_layout();

    let mut spans: Vec<(usize, usize)> = template
        .states()
        .iter()
        .map(|s| (s.offset(), s.spec().component().layout()))
        .chain(
            template
                .services()
                .iter()
                .map(|s| (s.offset(), s.spec().component().layout())),
        )
        .map(|(offset, component)| {
            assert_eq!(offset % component.align(), 0);
            assert!(component.align() <= layout.align());
            (offset, offset + component.size())
        })
        .collect();
    spans.sort_unstable();

    for pair in spans.windows(2) {
        assert!(pair[0].1 <= pair[1].0);
    }
    assert!(spans.iter().all(|&(_, end)| end <= layout.size()));
}

#[test]
fn default_weight_comes_from_config() {
    let spec = NodeSpec::random().child(work("A")).child(work("B"));
    let config = CompileConfig::default().with_default_weight(7);

    let template = Template::compile_with(&spec, &config).unwrap();
    assert_eq!(template.weights(0), Some(&[7, 7][..]));
}

#[test]
fn nesting_past_max_depth_is_rejected() {
    let inner = NodeSpec::select().child(work("A"));
    let spec = NodeSpec::select().child(NodeSpec::select().child(inner));
    let config = CompileConfig::default().with_max_depth(2);

    let err = Template::compile_with(&spec, &config).unwrap_err();
    assert_eq!(err, BtError::DepthExceeded { limit: 2 });
    assert!(Template::compile_with(&spec, &config.with_max_depth(3)).is_ok());
}

#[test]
fn overflowing_weights_are_rejected() {
    let spec = NodeSpec::select().child(
        NodeSpec::random()
            .weighted_child(u32::MAX, work("A"))
            .weighted_child(1, work("B")),
    );

    let err = Template::compile(&spec).unwrap_err();
    assert_eq!(err, BtError::WeightOverflow { node: 1 });
}

#[test]
fn empty_template_makes_update_a_no_op() {
    let template = Arc::new(Template::<World, ()>::default());
    assert!(template.is_empty());
    assert_eq!(template.to_string(), "");

    let mut tree = BehaviorTree::new(template);
    let mut world = World::default();
    tree.update(&mut world, &mut (), &mut || 0u32);

    assert_eq!(tree.current_leaf(), None);
    assert_eq!(world.ticks, 0);
}

#[test]
fn one_template_runs_on_many_threads() {
    let template = Arc::new(Template::compile(&patrol()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let template = Arc::clone(&template);
            thread::spawn(move || {
                let mut tree = BehaviorTree::new(template);
                let mut world = World::default();
                for _ in 0..10 {
                    tree.update(&mut world, &mut (), &mut || 0u32);
                }
                world.ticks
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 10);
    }
}

#[test]
#[should_panic]
fn children_of_an_unknown_node_panics() {
    let template = Template::compile(&patrol()).unwrap();
    template.children(template.node_count());
}
