use std::sync::Arc;

use ai_hbt::{
    derive_seed, BehaviorTree, Conditional, ConditionalSpec, Hooks, NodeSpec, Service,
    ServiceSpec, SplitMix64, State, StateSpec, Template,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct Guard {
    position: i32,
    intruder: Option<i32>,
    log: Vec<String>,
}

#[derive(Debug, Clone, Copy)]
struct Frame {
    tick: u64,
}

#[derive(Debug)]
struct WalkTo {
    target: i32,
}

impl State<Guard, Frame> for WalkTo {
    fn update(&mut self, guard: &mut Guard, _frame: &mut Frame) -> bool {
        guard.position += (self.target - guard.position).signum();
        guard.position == self.target
    }
}

#[derive(Debug, Default)]
struct Chase;

impl State<Guard, Frame> for Chase {
    const HOOKS: Hooks = Hooks::ACTIVATE.union(Hooks::DEACTIVATE);

    fn activate(&mut self, guard: &mut Guard, frame: &mut Frame) {
        guard.log.push(format!("tick {}: intruder spotted", frame.tick));
    }

    fn deactivate(&mut self, guard: &mut Guard, frame: &mut Frame) {
        guard.log.push(format!("tick {}: lost the intruder", frame.tick));
    }

    fn update(&mut self, guard: &mut Guard, _frame: &mut Frame) -> bool {
        if let Some(target) = guard.intruder {
            guard.position += (target - guard.position).signum();
        }
        false
    }
}

#[derive(Debug, Default)]
struct Idle {
    waited: u32,
}

impl State<Guard, Frame> for Idle {
    fn update(&mut self, _guard: &mut Guard, _frame: &mut Frame) -> bool {
        self.waited += 1;
        self.waited % 3 == 0
    }
}

#[derive(Debug, Default)]
struct SeesIntruder;

impl Conditional<Guard, Frame> for SeesIntruder {
    fn check(&mut self, guard: &Guard, _frame: &Frame) -> bool {
        guard
            .intruder
            .is_some_and(|intruder| (intruder - guard.position).abs() <= 4)
    }
}

#[derive(Debug, Default)]
struct Lantern {
    lit: u32,
}

impl Service<Guard, Frame> for Lantern {
    const HOOKS: Hooks = Hooks::ACTIVATE.union(Hooks::UPDATE);

    fn activate(&mut self, guard: &mut Guard, frame: &mut Frame) {
        guard.log.push(format!("tick {}: lantern lit", frame.tick));
    }

    fn update(&mut self, _guard: &mut Guard, _frame: &mut Frame) {
        self.lit += 1;
    }
}

fn walk_to(target: i32) -> NodeSpec<Guard, Frame> {
    NodeSpec::leaf(StateSpec::from_fn(move || WalkTo { target }).named("WalkTo"))
}

fn guard_tree() -> NodeSpec<Guard, Frame> {
    let patrol = NodeSpec::sequence()
        .service(ServiceSpec::of::<Lantern>().named("Lantern"))
        .child(walk_to(0))
        .child(walk_to(6))
        .child(
            NodeSpec::random()
                .weighted_child(3, NodeSpec::leaf(StateSpec::of::<Idle>().named("Idle")))
                .weighted_child(1, walk_to(-3)),
        );

    NodeSpec::select()
        .child(
            NodeSpec::leaf(StateSpec::of::<Chase>().named("Chase")).conditional(
                ConditionalSpec::of::<SeesIntruder>()
                    .named("SeesIntruder")
                    .continuous(),
            ),
        )
        .child(patrol)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let spec = guard_tree();
    println!("specification:\n{spec}");

    let template = Arc::new(Template::compile(&spec)?);
    println!("compiled:\n{template}");

    let mut tree = BehaviorTree::new(Arc::clone(&template));
    let mut guard = Guard::default();
    let mut random = SplitMix64::new(derive_seed(0x5EED, 1, 0));

    for tick in 0..40 {
        guard.intruder = (12..20).contains(&tick).then_some(8);
        let mut frame = Frame { tick };
        tree.update(&mut guard, &mut frame, &mut random);
        tracing::info!(
            tick,
            position = guard.position,
            leaf = ?tree.current_leaf(),
            "guard ticked"
        );
    }

    for line in &guard.log {
        println!("{line}");
    }
    Ok(())
}
