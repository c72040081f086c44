//! Compiled, immutable behavior tree templates.
//!
//! Compilation flattens a `NodeSpec` tree into index-addressed arrays and a
//! byte layout for one per-instance memory block. A `Template` is never
//! mutated after `compile` returns, so it can be shared through an `Arc` by
//! any number of tree instances on any number of threads.

use std::alloc::Layout;
use std::fmt;
use std::ops::Range;

use tracing::debug;

use crate::component::{Component, ConditionalSpec, ServiceSpec, StateSpec};
use crate::config::CompileConfig;
use crate::error::{BtError, Result};
use crate::spec::{ChildSpec, NodeKind, NodeSpec, Shape};

pub(crate) const ROOT: u32 = 0;

/// Half-open index range `[start, end)` into one of the template's arrays.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(self) -> usize {
        (self.end - self.start) as usize
    }

    pub fn is_empty(self) -> bool {
        self.start == self.end
    }

    pub fn range(self) -> Range<usize> {
        self.start as usize..self.end as usize
    }
}

/// Kind-specific payload of a compiled node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeLink {
    None,
    /// Leaf index (also the state index).
    Leaf(u32),
    /// Start of this node's weights, parallel to its children.
    Weights(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompiledNode {
    pub kind: NodeKind,
    /// Conditionals attached to this node, indexing the conditional array.
    pub conditionals: Span,
    /// Indexes the child lookup.
    pub children: Span,
    pub link: NodeLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompiledLeaf {
    pub node: u32,
    /// Every inherited conditional; indexes the conditional lookup.
    pub entry: Span,
    /// Inherited conditionals that must stay true while active.
    pub continuous: Span,
    /// Inherited conditionals that restart selection when true.
    pub preempt: Span,
    /// Every inherited service; indexes the service lookup.
    pub services: Span,
    /// Node to traverse once this leaf finishes.
    pub next_in_sequence: Option<u32>,
}

/// A component descriptor with its byte offset in the instance block.
#[derive(Clone)]
pub struct Placed<S> {
    pub(crate) spec: S,
    pub(crate) offset: usize,
}

impl<S> Placed<S> {
    pub fn spec(&self) -> &S {
        &self.spec
    }

    pub fn offset(&self) -> usize {
        self.offset
    }
}

pub type CompiledState<D, C> = Placed<StateSpec<D, C>>;
pub type CompiledService<D, C> = Placed<ServiceSpec<D, C>>;
pub type CompiledConditional<D, C> = Placed<ConditionalSpec<D, C>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    State,
    Service,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ComponentRef {
    pub kind: ComponentKind,
    pub index: u32,
}

/// The flattened arrays of a template, comparable across compilations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateShape {
    pub nodes: Vec<CompiledNode>,
    pub leaves: Vec<CompiledLeaf>,
    pub child_lookup: Vec<u32>,
    pub service_lookup: Vec<u32>,
    pub conditional_lookup: Vec<u32>,
    pub weights: Vec<u32>,
    pub states: usize,
    pub services: usize,
    pub conditionals: usize,
    pub block_size: usize,
    pub block_align: usize,
}

pub struct Template<D, C> {
    nodes: Vec<CompiledNode>,
    leaves: Vec<CompiledLeaf>,
    states: Vec<CompiledState<D, C>>,
    services: Vec<CompiledService<D, C>>,
    conditionals: Vec<CompiledConditional<D, C>>,
    child_lookup: Vec<u32>,
    service_lookup: Vec<u32>,
    conditional_lookup: Vec<u32>,
    weights: Vec<u32>,
    init: Vec<ComponentRef>,
    block: Layout,
}

impl<D, C> Default for Template<D, C> {
    /// An empty template. Instances bound to it never do anything.
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            leaves: Vec::new(),
            states: Vec::new(),
            services: Vec::new(),
            conditionals: Vec::new(),
            child_lookup: Vec::new(),
            service_lookup: Vec::new(),
            conditional_lookup: Vec::new(),
            weights: Vec::new(),
            init: Vec::new(),
            block: Layout::new::<()>(),
        }
    }
}

impl<D, C> Template<D, C> {
    pub fn compile(spec: &NodeSpec<D, C>) -> Result<Self> {
        Self::compile_with(spec, &CompileConfig::default())
    }

    pub fn compile_with(spec: &NodeSpec<D, C>, config: &CompileConfig) -> Result<Self> {
        let mut compiler = Compiler {
            config,
            template: Template::default(),
            size: 0,
            align: 1,
            inherited_conditionals: Vec::new(),
            inherited_services: Vec::new(),
        };

        let mut tail = Vec::new();
        compiler.node(spec, 0, &mut tail)?;
        compiler.finish()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves.len()
    }

    pub fn nodes(&self) -> &[CompiledNode] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[CompiledLeaf] {
        &self.leaves
    }

    pub fn states(&self) -> &[CompiledState<D, C>] {
        &self.states
    }

    pub fn services(&self) -> &[CompiledService<D, C>] {
        &self.services
    }

    pub fn conditionals(&self) -> &[CompiledConditional<D, C>] {
        &self.conditionals
    }

    /// Child node indices of `node`, in declaration order.
    ///
    /// # Panics
    ///
    /// Panics if `node >= self.node_count()`.
    pub fn children(&self, node: usize) -> &[u32] {
        &self.child_lookup[self.nodes[node].children.range()]
    }

    /// Weights of a `Random` node's children, parallel to [`Self::children`].
    /// `None` for every other node kind.
    ///
    /// # Panics
    ///
    /// Panics if `node >= self.node_count()`.
    pub fn weights(&self, node: usize) -> Option<&[u32]> {
        let node = &self.nodes[node];
        match node.link {
            NodeLink::Weights(start) => {
                let start = start as usize;
                Some(&self.weights[start..start + node.children.len()])
            }
            NodeLink::None | NodeLink::Leaf(_) => None,
        }
    }

    /// Service indices inherited by `leaf`.
    ///
    /// # Panics
    ///
    /// Panics if `leaf >= self.leaf_count()`.
    pub fn leaf_services(&self, leaf: usize) -> &[u32] {
        &self.service_lookup[self.leaves[leaf].services.range()]
    }

    /// Conditional indices guarding entry into `leaf`.
    ///
    /// # Panics
    ///
    /// Panics if `leaf >= self.leaf_count()`.
    pub fn leaf_conditionals(&self, leaf: usize) -> &[u32] {
        &self.conditional_lookup[self.leaves[leaf].entry.range()]
    }

    pub(crate) fn continuous_conditionals(&self, leaf: usize) -> &[u32] {
        &self.conditional_lookup[self.leaves[leaf].continuous.range()]
    }

    pub(crate) fn preempt_conditionals(&self, leaf: usize) -> &[u32] {
        &self.conditional_lookup[self.leaves[leaf].preempt.range()]
    }

    /// Layout of the per-instance memory block.
    pub fn block_layout(&self) -> Layout {
        self.block
    }

    pub(crate) fn init_order(&self) -> &[ComponentRef] {
        &self.init
    }

    pub(crate) fn component(&self, id: ComponentRef) -> (&Component, usize) {
        let index = id.index as usize;
        match id.kind {
            ComponentKind::State => {
                let placed = &self.states[index];
                (&placed.spec.component, placed.offset)
            }
            ComponentKind::Service => {
                let placed = &self.services[index];
                (&placed.spec.component, placed.offset)
            }
            ComponentKind::Conditional => {
                let placed = &self.conditionals[index];
                (&placed.spec.component, placed.offset)
            }
        }
    }

    pub fn shape(&self) -> TemplateShape {
        TemplateShape {
            nodes: self.nodes.clone(),
            leaves: self.leaves.clone(),
            child_lookup: self.child_lookup.clone(),
            service_lookup: self.service_lookup.clone(),
            conditional_lookup: self.conditional_lookup.clone(),
            weights: self.weights.clone(),
            states: self.states.len(),
            services: self.services.len(),
            conditionals: self.conditionals.len(),
            block_size: self.block.size(),
            block_align: self.block.align(),
        }
    }

    fn fmt_node(&self, f: &mut fmt::Formatter<'_>, indent: usize, index: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        let node = &self.nodes[index];

        write!(f, "{pad}- ({index}) ")?;
        match node.link {
            NodeLink::Leaf(leaf) => {
                let label = self.states[leaf as usize].spec.component.label();
                match self.leaves[leaf as usize].next_in_sequence {
                    Some(next) => writeln!(f, "Leaf ({leaf}) ({label}) -> ({next})")?,
                    None => writeln!(f, "Leaf ({leaf}) ({label})")?,
                }
            }
            NodeLink::Weights(_) => {
                let weights = self.weights(index).unwrap_or_default();
                writeln!(f, "{} {weights:?}", node.kind)?;
            }
            NodeLink::None => writeln!(f, "{}", node.kind)?,
        }

        for conditional in node.conditionals.range() {
            let spec = &self.conditionals[conditional].spec;
            let flags = match (spec.continuous, spec.preempt) {
                (false, false) => "",
                (true, false) => " [continuous]",
                (false, true) => " [preempt]",
                (true, true) => " [continuous, preempt]",
            };
            writeln!(
                f,
                "{pad}|   ({conditional}) Conditional ({}){flags}",
                spec.component.label()
            )?;
        }

        if let NodeLink::Leaf(leaf) = node.link {
            for &service in self.leaf_services(leaf as usize) {
                let label = self.services[service as usize].spec.component.label();
                writeln!(f, "{pad}|   ({service}) Service ({label})")?;
            }
        }

        for &child in self.children(index) {
            self.fmt_node(f, indent + 2, child as usize)?;
        }
        Ok(())
    }
}

impl<D, C> fmt::Display for Template<D, C> {
    /// Debug rendering of the compiled structure: node and leaf indices,
    /// next-in-sequence links, and component indices.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nodes.is_empty() {
            return Ok(());
        }
        self.fmt_node(f, 0, ROOT as usize)
    }
}

impl<D, C> fmt::Debug for Template<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("nodes", &self.nodes.len())
            .field("leaves", &self.leaves.len())
            .field("services", &self.services.len())
            .field("conditionals", &self.conditionals.len())
            .field("block_size", &self.block.size())
            .field("block_align", &self.block.align())
            .finish()
    }
}

fn index(len: usize, what: &'static str) -> Result<u32> {
    u32::try_from(len).map_err(|_| BtError::IndexOverflow { what })
}

struct Compiler<'a, D, C> {
    config: &'a CompileConfig,
    template: Template<D, C>,
    size: usize,
    align: usize,
    // Attachments of the nodes on the current root-to-node path.
    inherited_conditionals: Vec<u32>,
    inherited_services: Vec<u32>,
}

impl<D, C> Compiler<'_, D, C> {
    fn finish(self) -> Result<Template<D, C>> {
        let Compiler {
            mut template,
            size,
            align,
            ..
        } = self;

        template.block = Layout::from_size_align(size, align)
            .map_err(|_| BtError::BlockTooLarge { size, align })?;

        debug!(
            nodes = template.nodes.len(),
            leaves = template.leaves.len(),
            services = template.services.len(),
            conditionals = template.conditionals.len(),
            block_size = size,
            block_align = align,
            "compiled behavior tree template"
        );
        Ok(template)
    }

    /// Bump-allocates an aligned slot in the instance block.
    fn place(&mut self, layout: Layout) -> Result<usize> {
        let too_large = || BtError::BlockTooLarge {
            size: self.size,
            align: layout.align(),
        };
        let offset = self
            .size
            .checked_next_multiple_of(layout.align())
            .ok_or_else(too_large)?;
        let end = offset.checked_add(layout.size()).ok_or_else(too_large)?;

        self.size = end;
        self.align = self.align.max(layout.align());
        Ok(offset)
    }

    /// Compiles `spec` and its subtree in pre-order. Leaves that can end this
    /// subtree are appended to `tail` so an enclosing sequence can link them.
    fn node(&mut self, spec: &NodeSpec<D, C>, depth: usize, tail: &mut Vec<u32>) -> Result<u32> {
        if depth > self.config.max_depth {
            return Err(BtError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }

        let node_index = index(self.template.nodes.len(), "nodes")?;
        self.template.nodes.push(CompiledNode {
            kind: spec.kind(),
            conditionals: Span::default(),
            children: Span::default(),
            link: NodeLink::None,
        });

        let inherited_conditionals = self.inherited_conditionals.len();
        let inherited_services = self.inherited_services.len();

        let conditionals = self.attach_conditionals(spec.conditionals())?;
        self.attach_services(spec.services())?;

        let (children, link) = match spec.shape() {
            Shape::Leaf(state) => {
                let leaf = self.leaf(state, node_index, tail)?;
                (Span::default(), NodeLink::Leaf(leaf))
            }
            Shape::Composite {
                kind: NodeKind::Sequence,
                children,
            } => (self.sequence(children, depth, tail)?, NodeLink::None),
            Shape::Composite {
                kind: NodeKind::Random,
                children,
            } => {
                let span = self.branch(children, depth, tail)?;
                let weights = self.weights(children, node_index)?;
                (span, NodeLink::Weights(weights))
            }
            Shape::Composite { children, .. } => {
                (self.branch(children, depth, tail)?, NodeLink::None)
            }
        };

        let node = &mut self.template.nodes[node_index as usize];
        node.conditionals = conditionals;
        node.children = children;
        node.link = link;

        self.inherited_conditionals.truncate(inherited_conditionals);
        self.inherited_services.truncate(inherited_services);
        Ok(node_index)
    }

    fn attach_conditionals(&mut self, specs: &[ConditionalSpec<D, C>]) -> Result<Span> {
        let start = index(self.template.conditionals.len(), "conditionals")?;
        for spec in specs {
            let offset = self.place(spec.component.layout())?;
            let conditional = index(self.template.conditionals.len(), "conditionals")?;
            self.template.conditionals.push(Placed {
                spec: spec.clone(),
                offset,
            });
            self.template.init.push(ComponentRef {
                kind: ComponentKind::Conditional,
                index: conditional,
            });
            self.inherited_conditionals.push(conditional);
        }
        let end = index(self.template.conditionals.len(), "conditionals")?;
        Ok(Span::new(start, end))
    }

    fn attach_services(&mut self, specs: &[ServiceSpec<D, C>]) -> Result<()> {
        for spec in specs {
            let offset = self.place(spec.component.layout())?;
            let service = index(self.template.services.len(), "services")?;
            self.template.services.push(Placed {
                spec: spec.clone(),
                offset,
            });
            self.template.init.push(ComponentRef {
                kind: ComponentKind::Service,
                index: service,
            });
            self.inherited_services.push(service);
        }
        Ok(())
    }

    fn leaf(&mut self, state: &StateSpec<D, C>, node: u32, tail: &mut Vec<u32>) -> Result<u32> {
        let leaf = index(self.template.leaves.len(), "leaves")?;
        let offset = self.place(state.component.layout())?;
        self.template.states.push(Placed {
            spec: state.clone(),
            offset,
        });
        self.template.init.push(ComponentRef {
            kind: ComponentKind::State,
            index: leaf,
        });

        let Template {
            conditionals,
            conditional_lookup,
            service_lookup,
            ..
        } = &mut self.template;
        let inherited = &self.inherited_conditionals;

        let entry_start = index(conditional_lookup.len(), "conditional lookups")?;
        conditional_lookup.extend_from_slice(inherited);

        let continuous_start = index(conditional_lookup.len(), "conditional lookups")?;
        conditional_lookup.extend(
            inherited
                .iter()
                .copied()
                .filter(|&c| conditionals[c as usize].spec.continuous),
        );

        let preempt_start = index(conditional_lookup.len(), "conditional lookups")?;
        conditional_lookup.extend(
            inherited
                .iter()
                .copied()
                .filter(|&c| conditionals[c as usize].spec.preempt),
        );
        let preempt_end = index(conditional_lookup.len(), "conditional lookups")?;

        let services_start = index(service_lookup.len(), "service lookups")?;
        service_lookup.extend_from_slice(&self.inherited_services);
        let services_end = index(service_lookup.len(), "service lookups")?;

        self.template.leaves.push(CompiledLeaf {
            node,
            entry: Span::new(entry_start, continuous_start),
            continuous: Span::new(continuous_start, preempt_start),
            preempt: Span::new(preempt_start, preempt_end),
            services: Span::new(services_start, services_end),
            next_in_sequence: None,
        });
        tail.push(leaf);
        Ok(leaf)
    }

    fn reserve_children(&mut self, count: usize) -> Result<Span> {
        let start = self.template.child_lookup.len();
        let end = index(start + count, "children")?;
        self.template.child_lookup.resize(end as usize, 0);
        Ok(Span::new(start as u32, end))
    }

    /// Select and Random: every child's tail is a tail of this node.
    fn branch(
        &mut self,
        children: &[ChildSpec<D, C>],
        depth: usize,
        tail: &mut Vec<u32>,
    ) -> Result<Span> {
        let span = self.reserve_children(children.len())?;
        for (slot, child) in span.range().zip(children) {
            let child_node = self.node(&child.subtree, depth + 1, tail)?;
            self.template.child_lookup[slot] = child_node;
        }
        Ok(span)
    }

    /// Links the tail of child `i` to child `i + 1`; the last child's tail
    /// becomes this node's tail.
    fn sequence(
        &mut self,
        children: &[ChildSpec<D, C>],
        depth: usize,
        tail: &mut Vec<u32>,
    ) -> Result<Span> {
        let span = self.reserve_children(children.len())?;
        let mut pending: Vec<u32> = Vec::new();

        for (slot, child) in span.range().zip(children) {
            let mut child_tail = Vec::new();
            let child_node = self.node(&child.subtree, depth + 1, &mut child_tail)?;
            self.template.child_lookup[slot] = child_node;

            for leaf in pending.drain(..) {
                self.template.leaves[leaf as usize].next_in_sequence = Some(child_node);
            }
            pending = child_tail;
        }

        tail.append(&mut pending);
        Ok(span)
    }

    fn weights(&mut self, children: &[ChildSpec<D, C>], node: u32) -> Result<u32> {
        let start = index(self.template.weights.len(), "weights")?;
        let mut total: u32 = 0;
        for child in children {
            let weight = child.weight.unwrap_or(self.config.default_weight);
            total = total
                .checked_add(weight)
                .ok_or(BtError::WeightOverflow {
                    node: node as usize,
                })?;
            self.template.weights.push(weight);
        }
        Ok(start)
    }
}
