use std::sync::Arc;

use ai_hbt::{
    BehaviorTree, Conditional, ConditionalSpec, NodeSpec, Service, ServiceSpec, SplitMix64, State,
    StateSpec, Template,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

#[derive(Default)]
struct World {
    ticks: u64,
}

#[derive(Default)]
struct Step {
    remaining: u8,
}

impl State<World, ()> for Step {
    fn update(&mut self, world: &mut World, _context: &mut ()) -> bool {
        world.ticks += 1;
        self.remaining = self.remaining.wrapping_sub(1);
        self.remaining % 4 == 0
    }
}

#[derive(Default)]
struct AlwaysTrue;

impl Conditional<World, ()> for AlwaysTrue {
    fn check(&mut self, _world: &World, _context: &()) -> bool {
        true
    }
}

#[derive(Default)]
struct Heartbeat;

impl Service<World, ()> for Heartbeat {}

fn step() -> NodeSpec<World, ()> {
    NodeSpec::leaf(StateSpec::of::<Step>())
}

fn bench_template() -> NodeSpec<World, ()> {
    let guard = || ConditionalSpec::of::<AlwaysTrue>().continuous();
    let mut sequence = NodeSpec::sequence().service(ServiceSpec::of::<Heartbeat>());
    for _ in 0..8 {
        sequence = sequence.child(
            NodeSpec::random()
                .conditional(guard())
                .child(step())
                .child(step())
                .child(step()),
        );
    }
    NodeSpec::select().conditional(guard()).child(sequence)
}

fn bench_hbt_tick(c: &mut Criterion) {
    let template = Arc::new(Template::compile(&bench_template()).expect("compile"));

    let mut trees: Vec<BehaviorTree<World, ()>> = (0..256)
        .map(|_| BehaviorTree::new(Arc::clone(&template)))
        .collect();
    let mut world = World::default();
    let mut random = SplitMix64::new(0);

    c.bench_function("ai-hbt/tick(instances=256)", |b| {
        b.iter(|| {
            for tree in &mut trees {
                tree.update(&mut world, &mut (), &mut random);
            }
            black_box(world.ticks);
        })
    });

    c.bench_function("ai-hbt/bind", |b| {
        b.iter(|| black_box(BehaviorTree::new(Arc::clone(&template))))
    });
}

criterion_group!(benches, bench_hbt_tick);
criterion_main!(benches);
