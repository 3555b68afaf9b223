//! Discovery contracts. A registry advertises service instances and their
//! states; the link layer consumes full-snapshot watch sequences and feeds
//! them to the dispatcher. Backend implementations (etcd, consul, ...) live
//! outside this crate; `memory` provides the in-process one.

pub mod memory;

use serde_derive::{Deserialize, Serialize};

use crate::cluster::{Kind, State};
use crate::context::Context;
use crate::errors::LinkResult;

pub use memory::MemoryRegistry;

/// A single route advertised by a service instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub id: i32,
    #[serde(default)]
    pub stateful: bool,
    #[serde(default)]
    pub internal: bool,
    /// Locate-key override; the instance name is used when absent.
    #[serde(default)]
    pub group: Option<String>,
}

/// Identity and placement record advertised by an instance. Published on
/// start, refreshed on changes, removed on shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub id: String,
    pub kind: Kind,
    pub name: String,
    #[serde(default)]
    pub alias: String,
    pub state: State,
    pub address: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
    #[serde(default)]
    pub events: Vec<i32>,
    #[serde(default)]
    pub services: Vec<String>,
}

fn default_weight() -> u32 {
    1
}

/// Service discovery backend.
pub trait Registry: Send + Sync {
    /// The current full list of instances of the given kind.
    fn services(&self, ctx: &Context, kind: Kind) -> LinkResult<Vec<ServiceInstance>>;

    /// Opens a watch over instances of the given kind. Each `next` yields the
    /// full replacement list.
    fn watch(&self, ctx: &Context, kind: Kind) -> LinkResult<Box<dyn RegistryWatcher>>;
}

/// A lazy, restartable sequence of instance snapshots.
pub trait RegistryWatcher: Send {
    /// Blocks until the instance list changes, returning the new full list.
    fn next(&mut self) -> LinkResult<Vec<ServiceInstance>>;

    /// Releases the watch. Subsequent `next` calls fail.
    fn stop(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_serde_defaults() {
        let raw = r#"{
            "id": "node-1",
            "kind": "node",
            "name": "chat",
            "state": "work",
            "address": "127.0.0.1:40201"
        }"#;

        let instance: ServiceInstance = serde_json::from_str(raw).unwrap();

        assert_eq!(instance.weight, 1);
        assert!(instance.routes.is_empty());
        assert!(instance.alias.is_empty());
    }

    #[test]
    fn test_route_entry_group_default() {
        let raw = r#"{"id": 101, "stateful": true}"#;

        let entry: RouteEntry = serde_json::from_str(raw).unwrap();

        assert_eq!(entry.id, 101);
        assert!(entry.stateful);
        assert!(!entry.internal);
        assert!(entry.group.is_none());
    }
}
