//! Type-erased component descriptors.
//!
//! A component is a caller-defined `State`, `Service`, or `Conditional`. The
//! builder turns each concrete type into plain data: a layout, a constructor,
//! a destructor, and monomorphized function pointers for its behavior. The
//! runtime only ever calls through those pointers, so no vtable is involved
//! and component types need no shared base. Captured constructor arguments
//! are owned by the descriptor and handed to a monomorphized thunk as well.
//!
//! Optional entry points are declared through the `HOOKS` associated
//! constant. A hook that is not declared is stored as `None` and skipped by
//! the runtime, even if the type overrides the method. Overriding a hook
//! without adding its flag is a silent no-op:
//!
//! ```
//! use ai_hbt::{Hooks, State};
//!
//! struct Patrol;
//!
//! impl State<(), ()> for Patrol {
//!     // Without this line `activate` below would never run.
//!     const HOOKS: Hooks = Hooks::ACTIVATE;
//!
//!     fn activate(&mut self, _data: &mut (), _context: &mut ()) {}
//!
//!     fn update(&mut self, _data: &mut (), _context: &mut ()) -> bool {
//!         false
//!     }
//! }
//! ```

use std::alloc::Layout;
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use bitflags::bitflags;

bitflags! {
    /// Optional entry points a component implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Hooks: u8 {
        const ACTIVATE = 1 << 0;
        const DEACTIVATE = 1 << 1;
        /// Only meaningful for services; a state's update is mandatory.
        const UPDATE = 1 << 2;
    }
}

/// Behavior owned by a leaf, ticked while the leaf is active.
pub trait State<D, C>: Send + 'static {
    /// Hooks the runtime calls. Only `ACTIVATE` and `DEACTIVATE` apply.
    const HOOKS: Hooks = Hooks::empty();

    /// Runs when the leaf becomes active.
    ///
    /// Only called if `HOOKS` contains [`Hooks::ACTIVATE`].
    fn activate(&mut self, _data: &mut D, _context: &mut C) {}

    /// Runs when the leaf stops being active.
    ///
    /// Only called if `HOOKS` contains [`Hooks::DEACTIVATE`].
    fn deactivate(&mut self, _data: &mut D, _context: &mut C) {}

    /// Returns `true` once the state has finished.
    fn update(&mut self, data: &mut D, context: &mut C) -> bool;
}

/// Behavior running alongside every active leaf beneath the node it is
/// attached to.
pub trait Service<D, C>: Send + 'static {
    /// Hooks the runtime calls. Every hook is opt-in.
    const HOOKS: Hooks = Hooks::empty();

    /// Only called if `HOOKS` contains [`Hooks::ACTIVATE`].
    fn activate(&mut self, _data: &mut D, _context: &mut C) {}

    /// Only called if `HOOKS` contains [`Hooks::DEACTIVATE`].
    fn deactivate(&mut self, _data: &mut D, _context: &mut C) {}

    /// Runs every tick before the leaf's state updates.
    ///
    /// Only called if `HOOKS` contains [`Hooks::UPDATE`].
    fn update(&mut self, _data: &mut D, _context: &mut C) {}
}

/// Guard evaluated against read-only data.
pub trait Conditional<D, C>: Send + 'static {
    fn check(&mut self, data: &D, context: &C) -> bool;
}

pub(crate) type RawHook<D, C> = unsafe fn(NonNull<u8>, &mut D, &mut C);
pub(crate) type RawStateUpdate<D, C> = unsafe fn(NonNull<u8>, &mut D, &mut C) -> bool;
pub(crate) type RawCheck<D, C> = unsafe fn(NonNull<u8>, &D, &C) -> bool;

#[derive(Clone)]
enum Construct {
    Default(unsafe fn(NonNull<u8>)),
    /// Owned factory closure plus the thunk that knows its concrete type.
    Captured {
        make: Arc<dyn Any + Send + Sync>,
        emplace: unsafe fn(*const (), NonNull<u8>),
    },
}

unsafe fn construct_default<T: Default>(slot: NonNull<u8>) {
    // SAFETY: forwarded from `Component::construct`.
    unsafe { slot.cast::<T>().as_ptr().write(T::default()) };
}

unsafe fn construct_with<T, F: Fn() -> T>(make: *const (), slot: NonNull<u8>) {
    // SAFETY: `make` points at the `F` owned by the same `Construct`, and
    // the caller guarantees `slot` is writable and aligned for `T`.
    unsafe {
        let value = (*make.cast::<F>())();
        slot.cast::<T>().as_ptr().write(value);
    }
}

unsafe fn destruct<T>(slot: NonNull<u8>) {
    // SAFETY: forwarded from `Component::destruct`.
    unsafe { ptr::drop_in_place(slot.cast::<T>().as_ptr()) };
}

/// Identity, layout, and lifetime management shared by every component kind.
#[derive(Clone)]
pub struct Component {
    type_id: TypeId,
    label: &'static str,
    layout: Layout,
    construct: Construct,
    destruct: unsafe fn(NonNull<u8>),
}

impl Component {
    fn of<T: Default + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            label: type_name::<T>(),
            layout: Layout::new::<T>(),
            construct: Construct::Default(construct_default::<T>),
            destruct: destruct::<T>,
        }
    }

    fn from_fn<T, F>(make: F) -> Self
    where
        T: 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            type_id: TypeId::of::<T>(),
            label: type_name::<T>(),
            layout: Layout::new::<T>(),
            construct: Construct::Captured {
                make: Arc::new(make),
                emplace: construct_with::<T, F>,
            },
            destruct: destruct::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn has_captured_args(&self) -> bool {
        matches!(self.construct, Construct::Captured { .. })
    }

    /// # Safety
    /// `slot` must be uninitialized memory valid for writes of this
    /// component's layout.
    pub(crate) unsafe fn construct(&self, slot: NonNull<u8>) {
        match &self.construct {
            // SAFETY: forwarded to the caller.
            Construct::Default(construct) => unsafe { construct(slot) },
            Construct::Captured { make, emplace } => unsafe {
                emplace(Arc::as_ptr(make).cast::<()>(), slot)
            },
        }
    }

    /// # Safety
    /// `slot` must hold a live value built by `construct` on this component.
    pub(crate) unsafe fn destruct(&self, slot: NonNull<u8>) {
        // SAFETY: forwarded to the caller.
        unsafe { (self.destruct)(slot) }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("label", &self.label)
            .field("size", &self.layout.size())
            .field("align", &self.layout.align())
            .field("captured_args", &self.has_captured_args())
            .finish()
    }
}

// SAFETY (all thunks below): `slot` points at a live `T` constructed from the
// same descriptor, and the instance block never hands out overlapping
// references to it.

unsafe fn state_activate<S: State<D, C>, D, C>(slot: NonNull<u8>, data: &mut D, context: &mut C) {
    unsafe { slot.cast::<S>().as_mut() }.activate(data, context);
}

unsafe fn state_deactivate<S: State<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &mut D,
    context: &mut C,
) {
    unsafe { slot.cast::<S>().as_mut() }.deactivate(data, context);
}

unsafe fn state_update<S: State<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &mut D,
    context: &mut C,
) -> bool {
    unsafe { slot.cast::<S>().as_mut() }.update(data, context)
}

unsafe fn service_activate<S: Service<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &mut D,
    context: &mut C,
) {
    unsafe { slot.cast::<S>().as_mut() }.activate(data, context);
}

unsafe fn service_deactivate<S: Service<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &mut D,
    context: &mut C,
) {
    unsafe { slot.cast::<S>().as_mut() }.deactivate(data, context);
}

unsafe fn service_update<S: Service<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &mut D,
    context: &mut C,
) {
    unsafe { slot.cast::<S>().as_mut() }.update(data, context);
}

unsafe fn conditional_check<T: Conditional<D, C>, D, C>(
    slot: NonNull<u8>,
    data: &D,
    context: &C,
) -> bool {
    unsafe { slot.cast::<T>().as_mut() }.check(data, context)
}

fn hook<D, C>(declared: Hooks, wanted: Hooks, f: RawHook<D, C>) -> Option<RawHook<D, C>> {
    declared.contains(wanted).then_some(f)
}

/// Descriptor for a leaf's state.
pub struct StateSpec<D, C> {
    pub(crate) component: Component,
    pub(crate) activate: Option<RawHook<D, C>>,
    pub(crate) deactivate: Option<RawHook<D, C>>,
    pub(crate) update: RawStateUpdate<D, C>,
}

impl<D, C> StateSpec<D, C> {
    /// Default-constructs `S` on every bind.
    pub fn of<S: State<D, C> + Default>() -> Self {
        Self::with_component::<S>(Component::of::<S>())
    }

    /// Builds `S` from captured arguments on every bind.
    pub fn from_fn<S, F>(make: F) -> Self
    where
        S: State<D, C>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self::with_component::<S>(Component::from_fn(make))
    }

    fn with_component<S: State<D, C>>(component: Component) -> Self {
        Self {
            component,
            activate: hook(S::HOOKS, Hooks::ACTIVATE, state_activate::<S, D, C>),
            deactivate: hook(S::HOOKS, Hooks::DEACTIVATE, state_deactivate::<S, D, C>),
            update: state_update::<S, D, C>,
        }
    }
}

impl<D, C> StateSpec<D, C> {
    pub fn named(mut self, label: &'static str) -> Self {
        self.component.label = label;
        self
    }

    pub fn component(&self) -> &Component {
        &self.component
    }
}

/// Descriptor for a service attached to a node.
pub struct ServiceSpec<D, C> {
    pub(crate) component: Component,
    pub(crate) activate: Option<RawHook<D, C>>,
    pub(crate) deactivate: Option<RawHook<D, C>>,
    pub(crate) update: Option<RawHook<D, C>>,
}

impl<D, C> ServiceSpec<D, C> {
    pub fn of<S: Service<D, C> + Default>() -> Self {
        Self::with_component::<S>(Component::of::<S>())
    }

    pub fn from_fn<S, F>(make: F) -> Self
    where
        S: Service<D, C>,
        F: Fn() -> S + Send + Sync + 'static,
    {
        Self::with_component::<S>(Component::from_fn(make))
    }

    fn with_component<S: Service<D, C>>(component: Component) -> Self {
        Self {
            component,
            activate: hook(S::HOOKS, Hooks::ACTIVATE, service_activate::<S, D, C>),
            deactivate: hook(S::HOOKS, Hooks::DEACTIVATE, service_deactivate::<S, D, C>),
            update: hook(S::HOOKS, Hooks::UPDATE, service_update::<S, D, C>),
        }
    }
}

impl<D, C> ServiceSpec<D, C> {
    pub fn named(mut self, label: &'static str) -> Self {
        self.component.label = label;
        self
    }

    pub fn component(&self) -> &Component {
        &self.component
    }
}

/// Descriptor for a conditional attached to a node.
///
/// With neither flag set the conditional only guards entry into its subtree.
/// `continuous` conditionals must stay true while a leaf below is active;
/// `preempt` conditionals restart selection from the root as soon as they
/// report true.
pub struct ConditionalSpec<D, C> {
    pub(crate) component: Component,
    pub(crate) check: RawCheck<D, C>,
    pub(crate) preempt: bool,
    pub(crate) continuous: bool,
}

impl<D, C> ConditionalSpec<D, C> {
    pub fn of<T: Conditional<D, C> + Default>() -> Self {
        Self::with_component::<T>(Component::of::<T>())
    }

    pub fn from_fn<T, F>(make: F) -> Self
    where
        T: Conditional<D, C>,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_component::<T>(Component::from_fn(make))
    }

    fn with_component<T: Conditional<D, C>>(component: Component) -> Self {
        Self {
            component,
            check: conditional_check::<T, D, C>,
            preempt: false,
            continuous: false,
        }
    }
}

impl<D, C> ConditionalSpec<D, C> {
    pub fn preempt(mut self) -> Self {
        self.preempt = true;
        self
    }

    pub fn continuous(mut self) -> Self {
        self.continuous = true;
        self
    }

    pub fn named(mut self, label: &'static str) -> Self {
        self.component.label = label;
        self
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn is_preempt(&self) -> bool {
        self.preempt
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }
}

// Manual impls: a derive would demand `D: Clone, C: Clone`.
impl<D, C> Clone for StateSpec<D, C> {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            activate: self.activate,
            deactivate: self.deactivate,
            update: self.update,
        }
    }
}

impl<D, C> Clone for ServiceSpec<D, C> {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            activate: self.activate,
            deactivate: self.deactivate,
            update: self.update,
        }
    }
}

impl<D, C> Clone for ConditionalSpec<D, C> {
    fn clone(&self) -> Self {
        Self {
            component: self.component.clone(),
            check: self.check,
            preempt: self.preempt,
            continuous: self.continuous,
        }
    }
}
