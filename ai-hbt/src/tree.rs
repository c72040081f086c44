//! Runtime tree instances.
//!
//! A `BehaviorTree` binds one shared `Template` to its own memory block and
//! tracks which leaf, if any, is active. Each `update` resolves the next
//! stable leaf before returning: selection, transition hooks, then one tick of
//! the active leaf's services and state.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, trace};

use crate::memory::InstanceMemory;
use crate::random::{weighted_order, RandomSource};
use crate::spec::NodeKind;
use crate::template::{ComponentKind, NodeLink, Template, ROOT};

pub struct BehaviorTree<D, C> {
    memory: Option<InstanceMemory<D, C>>,
    current: Option<u32>,
    /// Set when the active state reported finished on the last tick.
    advance: bool,
    /// Reused (child, weight) buffer for `Random` nodes.
    scratch: Vec<(u32, u32)>,
}

/// One component instance as seen by tooling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentView {
    pub kind: ComponentKind,
    /// Index within the template's array for `kind`.
    pub index: usize,
    pub label: &'static str,
    pub type_id: TypeId,
    /// Byte offset inside the instance block.
    pub offset: usize,
    pub active: bool,
}

impl<D, C> Default for BehaviorTree<D, C> {
    /// An unbound instance; `update` is a no-op until `bind`.
    fn default() -> Self {
        Self {
            memory: None,
            current: None,
            advance: false,
            scratch: Vec::new(),
        }
    }
}

impl<D, C> BehaviorTree<D, C> {
    pub fn new(template: Arc<Template<D, C>>) -> Self {
        let mut tree = Self::default();
        tree.bind(template);
        tree
    }

    /// Binds `template`, replacing any previous one.
    ///
    /// The old block is destroyed first. No deactivate hooks run, since no
    /// data or context is available here. The instance starts idle.
    pub fn bind(&mut self, template: Arc<Template<D, C>>) {
        self.unbind();
        debug!(
            nodes = template.node_count(),
            leaves = template.leaf_count(),
            "binding behavior tree instance"
        );
        self.memory = Some(InstanceMemory::new(template));
    }

    /// Drops the template and every component instance.
    pub fn unbind(&mut self) {
        self.current = None;
        self.advance = false;
        if self.memory.take().is_some() {
            debug!("unbound behavior tree instance");
        }
    }

    pub fn template(&self) -> Option<&Arc<Template<D, C>>> {
        self.memory.as_ref().map(InstanceMemory::template)
    }

    pub fn is_bound(&self) -> bool {
        self.memory.is_some()
    }

    /// Index of the active leaf, `None` while idle.
    pub fn current_leaf(&self) -> Option<usize> {
        self.current.map(|leaf| leaf as usize)
    }

    pub fn leaf_count(&self) -> usize {
        self.template().map_or(0, |template| template.leaf_count())
    }

    /// Whether the active state reported finished on its last update. The
    /// next `update` moves on.
    pub fn is_finished(&self) -> bool {
        self.advance
    }

    /// Runs one tick.
    pub fn update<R>(&mut self, data: &mut D, context: &mut C, random: &mut R)
    where
        R: RandomSource + ?Sized,
    {
        let Self {
            memory,
            current,
            advance,
            scratch,
        } = self;
        let Some(memory) = memory.as_ref() else {
            return;
        };
        let template: &Template<D, C> = memory.template();
        if template.is_empty() {
            return;
        }
        // A callback that panicked mid-traversal leaves its frames behind.
        scratch.clear();

        let mut run = Run {
            template,
            memory,
            scratch,
            random,
        };

        let next = match *current {
            None => run.traverse(ROOT, data, context),
            Some(leaf) if *advance => {
                let next = template.leaves()[leaf as usize]
                    .next_in_sequence
                    .and_then(|node| run.traverse(node, data, context));
                match next {
                    Some(next) => Some(next),
                    None => {
                        trace!(leaf, "sequence exhausted, restarting from root");
                        run.traverse(ROOT, data, context)
                    }
                }
            }
            Some(leaf) => {
                if run.still_valid(leaf, data, context) {
                    Some(leaf)
                } else {
                    trace!(leaf, "active leaf invalidated, restarting from root");
                    run.traverse(ROOT, data, context)
                }
            }
        };

        run.transition(*current, next, data, context);
        *current = next;
        *advance = false;

        if let Some(leaf) = next {
            *advance = run.tick(leaf, data, context);
        }
    }

    /// Every component instance, with `active` set for the state, services,
    /// and guarding conditionals of the current leaf.
    pub fn components(&self) -> Vec<ComponentView> {
        let Some(memory) = self.memory.as_ref() else {
            return Vec::new();
        };
        let template = memory.template();
        let current = self.current.map(|leaf| leaf as usize);
        let active_services = current.map_or(&[][..], |leaf| template.leaf_services(leaf));
        let active_conditionals =
            current.map_or(&[][..], |leaf| template.leaf_conditionals(leaf));

        let states = template
            .states()
            .iter()
            .enumerate()
            .map(|(index, placed)| ComponentView {
                kind: ComponentKind::State,
                index,
                label: placed.spec().component().label(),
                type_id: placed.spec().component().type_id(),
                offset: placed.offset(),
                active: current == Some(index),
            });
        let services = template
            .services()
            .iter()
            .enumerate()
            .map(|(index, placed)| ComponentView {
                kind: ComponentKind::Service,
                index,
                label: placed.spec().component().label(),
                type_id: placed.spec().component().type_id(),
                offset: placed.offset(),
                active: active_services.contains(&(index as u32)),
            });
        let conditionals = template
            .conditionals()
            .iter()
            .enumerate()
            .map(|(index, placed)| ComponentView {
                kind: ComponentKind::Conditional,
                index,
                label: placed.spec().component().label(),
                type_id: placed.spec().component().type_id(),
                offset: placed.offset(),
                active: active_conditionals.contains(&(index as u32)),
            });

        states.chain(services).chain(conditionals).collect()
    }

    /// Typed access to one component instance. `None` if the instance is
    /// unbound, the index is out of range, or `T` is not the stored type.
    pub fn component<T: 'static>(&self, kind: ComponentKind, index: usize) -> Option<&T> {
        let memory = self.memory.as_ref()?;
        let template = memory.template();
        let (component, offset) = match kind {
            ComponentKind::State => {
                let placed = template.states().get(index)?;
                (placed.spec().component(), placed.offset())
            }
            ComponentKind::Service => {
                let placed = template.services().get(index)?;
                (placed.spec().component(), placed.offset())
            }
            ComponentKind::Conditional => {
                let placed = template.conditionals().get(index)?;
                (placed.spec().component(), placed.offset())
            }
        };
        if component.type_id() != TypeId::of::<T>() {
            return None;
        }
        // SAFETY: the slot holds a live `T` (checked above) for as long as
        // the block exists, and `&self` excludes `update` from mutating it.
        Some(unsafe { memory.slot(offset).cast::<T>().as_ref() })
    }
}

impl<D, C> fmt::Debug for BehaviorTree<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BehaviorTree")
            .field("bound", &self.is_bound())
            .field("current", &self.current)
            .field("advance", &self.advance)
            .finish()
    }
}

/// Borrowed view of one instance for the duration of an `update`.
struct Run<'a, D, C, R: ?Sized> {
    template: &'a Template<D, C>,
    memory: &'a InstanceMemory<D, C>,
    scratch: &'a mut Vec<(u32, u32)>,
    random: &'a mut R,
}

impl<D, C, R> Run<'_, D, C, R>
where
    R: RandomSource + ?Sized,
{
    fn check(&self, conditional: u32, data: &D, context: &C) -> bool {
        let placed = &self.template.conditionals()[conditional as usize];
        // SAFETY: the slot holds the conditional this descriptor built, and
        // the instance is exclusively borrowed for the tick.
        unsafe { (placed.spec.check)(self.memory.slot(placed.offset), data, context) }
    }

    /// Depth-first search for an entry leaf below `node`.
    fn traverse(&mut self, node: u32, data: &D, context: &C) -> Option<u32> {
        let compiled = self.template.nodes()[node as usize];

        for conditional in compiled.conditionals.range() {
            if !self.check(conditional as u32, data, context) {
                return None;
            }
        }

        match (compiled.kind, compiled.link) {
            (_, NodeLink::Leaf(leaf)) => Some(leaf),
            (NodeKind::Sequence, _) => {
                let first = self.template.children(node as usize).first().copied()?;
                self.traverse(first, data, context)
            }
            (NodeKind::Random, NodeLink::Weights(_)) => self.traverse_random(node, data, context),
            _ => {
                let template = self.template;
                template
                    .children(node as usize)
                    .iter()
                    .find_map(|&child| self.traverse(child, data, context))
            }
        }
    }

    fn traverse_random(&mut self, node: u32, data: &D, context: &C) -> Option<u32> {
        let template = self.template;
        let children = template.children(node as usize);
        let weights = template.weights(node as usize).unwrap_or_default();

        // Nested random nodes push above `base` and truncate back to it.
        let base = self.scratch.len();
        self.scratch
            .extend(children.iter().copied().zip(weights.iter().copied()));
        weighted_order(&mut self.scratch[base..], &mut *self.random);

        let mut found = None;
        for slot in base..base + children.len() {
            let child = self.scratch[slot].0;
            found = self.traverse(child, data, context);
            if found.is_some() {
                break;
            }
        }
        self.scratch.truncate(base);
        found
    }

    /// Continuous conditionals must hold and preempt conditionals must not.
    fn still_valid(&self, leaf: u32, data: &D, context: &C) -> bool {
        let leaf = leaf as usize;
        self.template
            .continuous_conditionals(leaf)
            .iter()
            .all(|&c| self.check(c, data, context))
            && !self
                .template
                .preempt_conditionals(leaf)
                .iter()
                .any(|&c| self.check(c, data, context))
    }

    fn transition(&self, from: Option<u32>, to: Option<u32>, data: &mut D, context: &mut C) {
        if from == to {
            return;
        }
        trace!(?from, ?to, "leaf transition");

        let template = self.template;
        let old_services = from.map_or(&[][..], |leaf| template.leaf_services(leaf as usize));
        let new_services = to.map_or(&[][..], |leaf| template.leaf_services(leaf as usize));

        if let Some(leaf) = from {
            let state = &template.states()[leaf as usize];
            if let Some(deactivate) = state.spec.deactivate {
                // SAFETY: see `check`.
                unsafe { deactivate(self.memory.slot(state.offset), data, context) };
            }
        }

        for service in old_services.iter().filter(|s| !new_services.contains(s)) {
            let service = &template.services()[*service as usize];
            if let Some(deactivate) = service.spec.deactivate {
                // SAFETY: see `check`.
                unsafe { deactivate(self.memory.slot(service.offset), data, context) };
            }
        }

        for service in new_services.iter().filter(|s| !old_services.contains(s)) {
            let service = &template.services()[*service as usize];
            if let Some(activate) = service.spec.activate {
                // SAFETY: see `check`.
                unsafe { activate(self.memory.slot(service.offset), data, context) };
            }
        }

        if let Some(leaf) = to {
            let state = &template.states()[leaf as usize];
            if let Some(activate) = state.spec.activate {
                // SAFETY: see `check`.
                unsafe { activate(self.memory.slot(state.offset), data, context) };
            }
        }
    }

    /// Updates the leaf's services, then its state. Returns the state's
    /// finished flag.
    fn tick(&self, leaf: u32, data: &mut D, context: &mut C) -> bool {
        let template = self.template;
        for &service in template.leaf_services(leaf as usize) {
            let service = &template.services()[service as usize];
            if let Some(update) = service.spec.update {
                // SAFETY: see `check`.
                unsafe { update(self.memory.slot(service.offset), data, context) };
            }
        }

        let state = &template.states()[leaf as usize];
        // SAFETY: see `check`.
        unsafe { (state.spec.update)(self.memory.slot(state.offset), data, context) }
    }
}
