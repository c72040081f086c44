//! Build-time specification of a behavior tree.
//!
//! A `NodeSpec` is a plain recursive tree. It is only read by the compiler,
//! so the same sub-tree can be referenced from several parents (or several
//! specifications) through an `Arc` without being copied.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use crate::component::{ConditionalSpec, ServiceSpec, StateSpec};
use crate::error::{BtError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Priority selection: first child that can be entered wins.
    Select,
    /// Children run one after another, linked by next-in-sequence.
    Sequence,
    /// Children are tried in a weighted random order.
    Random,
    /// Owns exactly one state.
    Leaf,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Select => "Select",
            NodeKind::Sequence => "Sequence",
            NodeKind::Random => "Random",
            NodeKind::Leaf => "Leaf",
        };
        f.write_str(name)
    }
}

/// A child edge: exclusively owned, or a read-only reference to a shared
/// sub-tree.
pub enum Subtree<D, C> {
    Owned(Box<NodeSpec<D, C>>),
    Shared(Arc<NodeSpec<D, C>>),
}

impl<D, C> Deref for Subtree<D, C> {
    type Target = NodeSpec<D, C>;

    fn deref(&self) -> &Self::Target {
        match self {
            Subtree::Owned(node) => node.as_ref(),
            Subtree::Shared(node) => node.as_ref(),
        }
    }
}

pub struct ChildSpec<D, C> {
    pub subtree: Subtree<D, C>,
    /// Only meaningful under a `Random` parent. `None` takes the compile
    /// config's default weight.
    pub weight: Option<u32>,
}

pub(crate) enum Shape<D, C> {
    Leaf(StateSpec<D, C>),
    Composite {
        kind: NodeKind,
        children: Vec<ChildSpec<D, C>>,
    },
}

pub struct NodeSpec<D, C> {
    shape: Shape<D, C>,
    conditionals: Vec<ConditionalSpec<D, C>>,
    services: Vec<ServiceSpec<D, C>>,
}

impl<D, C> NodeSpec<D, C> {
    fn with_shape(shape: Shape<D, C>) -> Self {
        Self {
            shape,
            conditionals: Vec::new(),
            services: Vec::new(),
        }
    }

    fn composite(kind: NodeKind) -> Self {
        Self::with_shape(Shape::Composite {
            kind,
            children: Vec::new(),
        })
    }

    pub fn select() -> Self {
        Self::composite(NodeKind::Select)
    }

    pub fn sequence() -> Self {
        Self::composite(NodeKind::Sequence)
    }

    pub fn random() -> Self {
        Self::composite(NodeKind::Random)
    }

    /// A leaf is the only node that carries a state, and it carries exactly
    /// one.
    pub fn leaf(state: StateSpec<D, C>) -> Self {
        Self::with_shape(Shape::Leaf(state))
    }

    pub(crate) fn shape(&self) -> &Shape<D, C> {
        &self.shape
    }

    pub fn kind(&self) -> NodeKind {
        match &self.shape {
            Shape::Leaf(_) => NodeKind::Leaf,
            Shape::Composite { kind, .. } => *kind,
        }
    }

    pub fn state(&self) -> Option<&StateSpec<D, C>> {
        match &self.shape {
            Shape::Leaf(state) => Some(state),
            Shape::Composite { .. } => None,
        }
    }

    pub fn conditionals(&self) -> &[ConditionalSpec<D, C>] {
        &self.conditionals
    }

    pub fn services(&self) -> &[ServiceSpec<D, C>] {
        &self.services
    }

    pub fn children(&self) -> &[ChildSpec<D, C>] {
        match &self.shape {
            Shape::Leaf(_) => &[],
            Shape::Composite { children, .. } => children,
        }
    }

    /// Attaches a conditional. Every leaf beneath this node inherits it.
    pub fn conditional(mut self, conditional: ConditionalSpec<D, C>) -> Self {
        self.conditionals.push(conditional);
        self
    }

    /// Attaches a service. Every leaf beneath this node inherits it.
    pub fn service(mut self, service: ServiceSpec<D, C>) -> Self {
        self.services.push(service);
        self
    }

    /// Adds an owned child.
    ///
    /// # Panics
    ///
    /// Panics if `self` is a leaf. Use [`NodeSpec::try_child`] to handle the
    /// error instead.
    pub fn child(self, child: NodeSpec<D, C>) -> Self {
        self.push_or_panic(Subtree::Owned(Box::new(child)), None)
    }

    /// Adds an owned child with a weight for `Random` selection.
    ///
    /// # Panics
    ///
    /// Panics if `self` is a leaf.
    pub fn weighted_child(self, weight: u32, child: NodeSpec<D, C>) -> Self {
        self.push_or_panic(Subtree::Owned(Box::new(child)), Some(weight))
    }

    /// Adds a reference to an externally owned sub-tree. The compiler reads
    /// it and never mutates it.
    ///
    /// # Panics
    ///
    /// Panics if `self` is a leaf.
    pub fn child_ref(self, child: &Arc<NodeSpec<D, C>>) -> Self {
        self.push_or_panic(Subtree::Shared(Arc::clone(child)), None)
    }

    /// # Panics
    ///
    /// Panics if `self` is a leaf.
    pub fn weighted_child_ref(self, weight: u32, child: &Arc<NodeSpec<D, C>>) -> Self {
        self.push_or_panic(Subtree::Shared(Arc::clone(child)), Some(weight))
    }

    pub fn try_child(mut self, child: NodeSpec<D, C>) -> Result<Self> {
        self.push_child(Subtree::Owned(Box::new(child)), None)?;
        Ok(self)
    }

    pub fn try_child_ref(mut self, child: &Arc<NodeSpec<D, C>>) -> Result<Self> {
        self.push_child(Subtree::Shared(Arc::clone(child)), None)?;
        Ok(self)
    }

    /// Appends a child edge in place.
    pub fn push_child(&mut self, subtree: Subtree<D, C>, weight: Option<u32>) -> Result<()> {
        match &mut self.shape {
            Shape::Leaf(_) => Err(BtError::ChildOnLeaf),
            Shape::Composite { children, .. } => {
                children.push(ChildSpec { subtree, weight });
                Ok(())
            }
        }
    }

    fn push_or_panic(mut self, subtree: Subtree<D, C>, weight: Option<u32>) -> Self {
        let pushed = self.push_child(subtree, weight);
        assert!(
            pushed.is_ok(),
            "leaf nodes cannot have children; wrap the leaf in a Select, Sequence, or Random node"
        );
        self
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = " ".repeat(indent);
        match self.state() {
            Some(state) => writeln!(f, "{pad}-{} ({})", self.kind(), state.component().label())?,
            None => writeln!(f, "{pad}-{}", self.kind())?,
        }
        for conditional in &self.conditionals {
            writeln!(f, "{pad}| Conditional ({})", conditional.component().label())?;
        }
        for service in &self.services {
            writeln!(f, "{pad}| Service ({})", service.component().label())?;
        }
        for child in self.children() {
            child.subtree.fmt_indented(f, indent + 2)?;
        }
        Ok(())
    }
}

impl<D, C> fmt::Display for NodeSpec<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

impl<D, C> fmt::Debug for NodeSpec<D, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSpec")
            .field("kind", &self.kind())
            .field("conditionals", &self.conditionals.len())
            .field("services", &self.services.len())
            .field("children", &self.children().len())
            .finish()
    }
}
