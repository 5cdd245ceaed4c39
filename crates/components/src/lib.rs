//! `components` crate: the capability surface the engine dispatches through.
//!
//! Every component, action and event, built-in or third-party, is
//! reached through the traits in [`traits`] and constructed by name from a
//! [`ComponentRegistry`]. The [`SharedContext`] lives here too so both the
//! engine and individual actions can import it without a circular dependency.

pub mod builtin;
pub mod context;
pub mod error;
pub mod mock;
pub mod placeholder;
pub mod registry;
pub mod traits;

pub use context::{ContextSnapshot, SharedContext};
pub use error::ComponentError;
pub use registry::{ComponentKind, ComponentRegistry};
pub use traits::{
    Action, Component, Event, EventCallback, Params, ReadySignal, ResultMap,
};
