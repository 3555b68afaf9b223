//! Routing index of the cluster. The dispatcher ingests full-state instance
//! snapshots from the registry watcher and answers "which endpoint serves
//! route R / instance N / event E". Each snapshot builds a fresh immutable
//! table swapped in whole; readers never observe a partially populated view.

pub mod balance;

use std::sync::{Arc, RwLock};

use hashbrown::HashMap;
use indexmap::IndexMap;

use crate::cluster::State;
use crate::errors::{LinkError, LinkResult};
use crate::registry::ServiceInstance;

pub use balance::{Balancer, RandomBalancer, WeightedRandomBalancer};

/// Dialable view of a service instance, rebuilt on every snapshot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Endpoint {
    pub ins_id: String,
    pub address: String,
    pub state: State,
    pub weight: u32,
}

impl Endpoint {
    fn of(instance: &ServiceInstance) -> Endpoint {
        Endpoint {
            ins_id: instance.id.clone(),
            address: instance.address.clone(),
            state: instance.state,
            weight: instance.weight.max(1),
        }
    }
}

/// A numeric operation handle and the endpoints willing to serve it.
pub struct Route {
    id: i32,
    group: String,
    stateful: bool,
    internal: bool,
    endpoints: IndexMap<String, Endpoint>,
    balancer: Arc<dyn Balancer>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("group", &self.group)
            .field("stateful", &self.stateful)
            .field("internal", &self.internal)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

impl Route {
    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The locate-key for stateful dispatch.
    #[inline]
    pub fn group(&self) -> &str {
        &self.group
    }

    #[inline]
    pub fn stateful(&self) -> bool {
        self.stateful
    }

    #[inline]
    pub fn internal(&self) -> bool {
        self.internal
    }

    /// Resolves an endpoint: direct lookup when `nid` is given, balancer pick
    /// otherwise.
    pub fn find_endpoint(&self, nid: Option<&str>) -> LinkResult<Endpoint> {
        match nid {
            Some(nid) if !nid.is_empty() => self
                .endpoints
                .get(nid)
                .cloned()
                .ok_or(LinkError::NotFoundEndpoint),
            _ => self
                .balancer
                .pick(&self.endpoints)
                .cloned()
                .ok_or(LinkError::NoEndpoint),
        }
    }

    pub fn iter_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }
}

/// Fan-out target set for trigger broadcasts.
#[derive(Debug)]
pub struct Event {
    id: i32,
    endpoints: IndexMap<String, Endpoint>,
}

impl Event {
    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn iter_endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.values()
    }
}

#[derive(Default)]
struct Snapshot {
    routes: HashMap<i32, Arc<Route>>,
    events: HashMap<i32, Arc<Event>>,
    endpoints: HashMap<String, Endpoint>,
}

/// The cluster routing table. Reads are hot and lock-free apart from an `Arc`
/// clone under a read lock; replacements swap the whole snapshot pointer.
pub struct Dispatcher {
    balancer: Arc<dyn Balancer>,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl Dispatcher {
    pub fn new(balancer: Arc<dyn Balancer>) -> Dispatcher {
        Dispatcher {
            balancer,
            snapshot: RwLock::new(Arc::new(Snapshot::default())),
        }
    }

    pub fn find_route(&self, id: i32) -> LinkResult<Arc<Route>> {
        self.current()
            .routes
            .get(&id)
            .cloned()
            .ok_or(LinkError::NotFoundRoute)
    }

    pub fn find_event(&self, id: i32) -> LinkResult<Arc<Event>> {
        self.current()
            .events
            .get(&id)
            .cloned()
            .ok_or(LinkError::NotFoundEvent)
    }

    /// Looks up an endpoint by instance id across the whole snapshot,
    /// including instances advertising no routes.
    pub fn find_endpoint(&self, nid: &str) -> LinkResult<Endpoint> {
        self.current()
            .endpoints
            .get(nid)
            .cloned()
            .ok_or(LinkError::NotFoundEndpoint)
    }

    /// Replaces the routing table with a freshly built snapshot derived from
    /// the given full instance list. Readers observe either the prior or the
    /// new table, never a mix.
    pub fn replace_services(&self, instances: &[ServiceInstance]) {
        let mut snapshot = Snapshot::default();
        let mut routes: HashMap<i32, RouteSeed> = HashMap::new();
        let mut events: HashMap<i32, IndexMap<String, Endpoint>> = HashMap::new();

        for instance in instances {
            if !instance.state.routable() {
                continue;
            }

            let endpoint = Endpoint::of(instance);

            snapshot
                .endpoints
                .insert(endpoint.ins_id.clone(), endpoint.clone());

            for entry in &instance.routes {
                let seed = routes.entry(entry.id).or_insert_with(|| RouteSeed {
                    group: entry
                        .group
                        .clone()
                        .unwrap_or_else(|| instance.name.clone()),
                    stateful: false,
                    internal: false,
                    endpoints: IndexMap::new(),
                });

                seed.stateful |= entry.stateful;
                seed.internal |= entry.internal;
                seed.endpoints
                    .insert(endpoint.ins_id.clone(), endpoint.clone());
            }

            for &event_id in &instance.events {
                events
                    .entry(event_id)
                    .or_insert_with(IndexMap::new)
                    .insert(endpoint.ins_id.clone(), endpoint.clone());
            }
        }

        for (id, seed) in routes {
            snapshot.routes.insert(
                id,
                Arc::new(Route {
                    id,
                    group: seed.group,
                    stateful: seed.stateful,
                    internal: seed.internal,
                    endpoints: seed.endpoints,
                    balancer: self.balancer.clone(),
                }),
            );
        }

        for (id, endpoints) in events {
            snapshot
                .events
                .insert(id, Arc::new(Event { id, endpoints }));
        }

        *self.snapshot.write().expect("Poisoned dispatcher lock") = Arc::new(snapshot);
    }

    #[inline]
    fn current(&self) -> Arc<Snapshot> {
        self.snapshot
            .read()
            .expect("Poisoned dispatcher lock")
            .clone()
    }
}

struct RouteSeed {
    group: String,
    stateful: bool,
    internal: bool,
    endpoints: IndexMap<String, Endpoint>,
}
