use std::sync::Arc;

use ai_hbt::{BehaviorTree, Conditional, ConditionalSpec, NodeSpec, State, StateSpec, Template};

#[derive(Debug, Default)]
struct RecordingWorld {
    ticked: Vec<&'static str>,
}

#[derive(Debug)]
struct Step {
    name: &'static str,
    finishes: bool,
}

impl State<RecordingWorld, ()> for Step {
    fn update(&mut self, world: &mut RecordingWorld, _context: &mut ()) -> bool {
        world.ticked.push(self.name);
        self.finishes
    }
}

#[derive(Default)]
struct Never;

impl Conditional<RecordingWorld, ()> for Never {
    fn check(&mut self, _world: &RecordingWorld, _context: &()) -> bool {
        false
    }
}

fn step(name: &'static str) -> NodeSpec<RecordingWorld, ()> {
    NodeSpec::leaf(StateSpec::from_fn(move || Step { name, finishes: true }).named(name))
}

fn hold(name: &'static str) -> NodeSpec<RecordingWorld, ()> {
    NodeSpec::leaf(StateSpec::from_fn(move || Step { name, finishes: false }).named(name))
}

fn ticked(spec: &NodeSpec<RecordingWorld, ()>, ticks: usize) -> Vec<&'static str> {
    let template = Arc::new(Template::compile(spec).unwrap());
    let mut tree = BehaviorTree::new(template);
    let mut world = RecordingWorld::default();
    let mut random = || 0u32;
    for _ in 0..ticks {
        tree.update(&mut world, &mut (), &mut random);
    }
    world.ticked
}

#[test]
fn sequence_cycles_with_period_three() {
    let spec = NodeSpec::sequence()
        .child(step("a"))
        .child(step("b"))
        .child(step("c"));

    assert_eq!(ticked(&spec, 7), vec!["a", "b", "c", "a", "b", "c", "a"]);
}

#[test]
fn sequence_starts_idle() {
    let spec = NodeSpec::sequence().child(step("a")).child(step("b"));
    let template = Arc::new(Template::compile(&spec).unwrap());
    let mut tree = BehaviorTree::new(template);
    assert_eq!(tree.current_leaf(), None);
    assert_eq!(tree.leaf_count(), 2);

    let mut world = RecordingWorld::default();
    tree.update(&mut world, &mut (), &mut || 0u32);
    assert_eq!(tree.current_leaf(), Some(0));
    assert!(tree.is_finished());
}

#[test]
fn unfinished_step_holds_control() {
    let spec = NodeSpec::sequence()
        .child(step("a"))
        .child(hold("b"))
        .child(step("c"));

    assert_eq!(ticked(&spec, 4), vec!["a", "b", "b", "b"]);
}

#[test]
fn nested_sequence_chains_into_enclosing_sibling() {
    let spec = NodeSpec::sequence()
        .child(NodeSpec::sequence().child(step("a")).child(step("b")))
        .child(step("c"));

    assert_eq!(ticked(&spec, 4), vec!["a", "b", "c", "a"]);
}

#[test]
fn select_tails_all_link_to_the_next_step() {
    // Whichever branch of the select runs, it continues into "c".
    let spec = NodeSpec::sequence()
        .child(
            NodeSpec::select()
                .child(step("a").conditional(ConditionalSpec::of::<Never>()))
                .child(step("b")),
        )
        .child(step("c"));

    assert_eq!(ticked(&spec, 4), vec!["b", "c", "b", "c"]);
}

#[test]
fn next_step_is_traversed_not_jumped_to() {
    let spec = NodeSpec::sequence().child(step("a")).child(
        NodeSpec::select()
            .child(step("b").conditional(ConditionalSpec::of::<Never>()))
            .child(step("c")),
    );

    assert_eq!(ticked(&spec, 4), vec!["a", "c", "a", "c"]);
}

#[test]
fn blocked_next_step_restarts_from_root() {
    let spec = NodeSpec::sequence()
        .child(step("a"))
        .child(step("b").conditional(ConditionalSpec::of::<Never>()));

    assert_eq!(ticked(&spec, 3), vec!["a", "a", "a"]);
}

#[test]
fn exhausted_sequence_under_select_restarts_at_first_step() {
    let spec = NodeSpec::select()
        .child(NodeSpec::sequence().child(step("a")).child(step("b")))
        .child(step("c"));

    assert_eq!(ticked(&spec, 5), vec!["a", "b", "a", "b", "a"]);
}

#[test]
fn childless_sequence_never_activates() {
    let spec = NodeSpec::<RecordingWorld, ()>::sequence();
    assert!(ticked(&spec, 3).is_empty());
}
