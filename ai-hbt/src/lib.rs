//! Hierarchical behavior trees compiled into flat, shareable templates.
//!
//! A tree is described with [`NodeSpec`], compiled once into an immutable
//! [`Template`], and run by any number of [`BehaviorTree`] instances. Each
//! instance keeps all of its component state in a single memory block laid
//! out by the template.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod component;
pub mod config;
pub mod error;
mod memory;
pub mod random;
pub mod spec;
pub mod template;
pub mod tree;

pub use component::{
    Component, Conditional, ConditionalSpec, Hooks, Service, ServiceSpec, State, StateSpec,
};
pub use config::CompileConfig;
pub use error::{BtError, Result};
pub use random::{derive_seed, RandomSource, SplitMix64};
pub use spec::{ChildSpec, NodeKind, NodeSpec, Subtree};
pub use template::{
    CompiledLeaf, CompiledNode, ComponentKind, NodeLink, Span, Template, TemplateShape,
};
pub use tree::{BehaviorTree, ComponentView};
