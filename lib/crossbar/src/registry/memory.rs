use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;

use crate::cluster::Kind;
use crate::context::Context;
use crate::errors::{LinkError, LinkResult};
use crate::registry::{Registry, RegistryWatcher, ServiceInstance};

struct Watch {
    kind: Kind,
    tx: Sender<Vec<ServiceInstance>>,
}

#[derive(Default)]
struct Inner {
    instances: HashMap<String, ServiceInstance>,
    watchers: Vec<Watch>,
}

/// In-process registry. Instances registered here are visible to all watchers
/// within the process; every change broadcasts the full replacement list for
/// the affected kind. Backs tests and standalone deployments.
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> MemoryRegistry {
        MemoryRegistry {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Publishes an instance, replacing any prior record with the same id.
    pub fn register(&self, instance: ServiceInstance) {
        let mut inner = self.inner.lock().expect("Poisoned registry lock");
        let kind = instance.kind;

        inner.instances.insert(instance.id.clone(), instance);

        Self::broadcast(&mut inner, kind);
    }

    /// Removes an instance by id.
    pub fn deregister(&self, id: &str) {
        let mut inner = self.inner.lock().expect("Poisoned registry lock");

        if let Some(instance) = inner.instances.remove(id) {
            Self::broadcast(&mut inner, instance.kind);
        }
    }

    fn snapshot(inner: &Inner, kind: Kind) -> Vec<ServiceInstance> {
        inner
            .instances
            .values()
            .filter(|instance| instance.kind == kind)
            .cloned()
            .collect()
    }

    fn broadcast(inner: &mut Inner, kind: Kind) {
        let list = Self::snapshot(inner, kind);

        // Watchers with a dropped receiver are reaped on the way through.
        inner
            .watchers
            .retain(|watch| watch.kind != kind || watch.tx.send(list.clone()).is_ok());
    }
}

impl Registry for MemoryRegistry {
    fn services(&self, _ctx: &Context, kind: Kind) -> LinkResult<Vec<ServiceInstance>> {
        let inner = self.inner.lock().expect("Poisoned registry lock");

        Ok(Self::snapshot(&inner, kind))
    }

    fn watch(&self, _ctx: &Context, kind: Kind) -> LinkResult<Box<dyn RegistryWatcher>> {
        let (tx, rx) = unbounded();

        let mut inner = self.inner.lock().expect("Poisoned registry lock");

        // Seed the watcher with the current view so a late subscriber does
        // not wait for the next cluster change.
        tx.send(Self::snapshot(&inner, kind))
            .expect("Fresh watcher channel rejected snapshot");

        inner.watchers.push(Watch { kind, tx });

        Ok(Box::new(MemoryRegistryWatcher { rx, stopped: false }))
    }
}

struct MemoryRegistryWatcher {
    rx: Receiver<Vec<ServiceInstance>>,
    stopped: bool,
}

impl RegistryWatcher for MemoryRegistryWatcher {
    fn next(&mut self) -> LinkResult<Vec<ServiceInstance>> {
        if self.stopped {
            return Err(LinkError::Canceled);
        }

        self.rx.recv().map_err(|_| LinkError::ConnectionClosed)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
