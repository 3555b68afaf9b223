//! User-location contracts. The locator is the cluster-wide pub/sub store
//! recording which node instance currently owns a user within each named
//! group. Backend implementations (redis, ...) live outside this crate;
//! `memory` provides the in-process one.

pub mod memory;

use crate::cluster::Kind;
use crate::context::Context;
use crate::errors::LinkResult;

pub use memory::MemoryLocator;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum EventKind {
    BindNode,
    UnbindNode,
}

/// A user-location change fanned out to watching instances.
#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub uid: i64,
    /// Group name the binding belongs to.
    pub ins_name: String,
    /// Instance the user was bound to or unbound from.
    pub ins_id: String,
}

/// The user-location store.
pub trait Locator: Send + Sync {
    /// The instance currently bound for `(uid, group)`, or `None`.
    fn locate_node(&self, ctx: &Context, uid: i64, group: &str) -> LinkResult<Option<String>>;

    /// Records `(uid, group) -> ins_id`, overwriting any prior binding for
    /// the group.
    fn bind_node(&self, ctx: &Context, uid: i64, group: &str, ins_id: &str) -> LinkResult<()>;

    /// Removes the binding, but only when the stored instance matches
    /// `ins_id`.
    fn unbind_node(&self, ctx: &Context, uid: i64, group: &str, ins_id: &str) -> LinkResult<()>;

    /// Opens a watch over location events relevant to instances of `kind`.
    fn watch(&self, ctx: &Context, kind: Kind) -> LinkResult<Box<dyn LocateWatcher>>;
}

/// A lazy, restartable sequence of location events.
pub trait LocateWatcher: Send {
    /// Blocks until events arrive, returning them in arrival order.
    fn next(&mut self) -> LinkResult<Vec<Event>>;

    /// Releases the watch. Subsequent `next` calls fail.
    fn stop(&mut self);
}
