use std::sync::Mutex;

use crossbeam_channel::{unbounded, Receiver, Sender};
use hashbrown::HashMap;

use crate::cluster::Kind;
use crate::context::Context;
use crate::errors::{LinkError, LinkResult};
use crate::locate::{Event, EventKind, LocateWatcher, Locator};

#[derive(Default)]
struct Inner {
    bindings: HashMap<(i64, String), String>,
    watchers: Vec<Sender<Vec<Event>>>,
}

/// In-process locator. Bindings and their change events stay within the
/// process; all watchers observe all events regardless of kind. Backs tests
/// and standalone deployments.
pub struct MemoryLocator {
    inner: Mutex<Inner>,
}

impl MemoryLocator {
    pub fn new() -> MemoryLocator {
        MemoryLocator {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn publish(inner: &mut Inner, event: Event) {
        inner
            .watchers
            .retain(|tx| tx.send(vec![event.clone()]).is_ok());
    }
}

impl Locator for MemoryLocator {
    fn locate_node(&self, _ctx: &Context, uid: i64, group: &str) -> LinkResult<Option<String>> {
        let inner = self.inner.lock().expect("Poisoned locator lock");

        Ok(inner.bindings.get(&(uid, group.to_string())).cloned())
    }

    fn bind_node(&self, _ctx: &Context, uid: i64, group: &str, ins_id: &str) -> LinkResult<()> {
        let mut inner = self.inner.lock().expect("Poisoned locator lock");

        inner
            .bindings
            .insert((uid, group.to_string()), ins_id.to_string());

        Self::publish(
            &mut inner,
            Event {
                kind: EventKind::BindNode,
                uid,
                ins_name: group.to_string(),
                ins_id: ins_id.to_string(),
            },
        );

        Ok(())
    }

    fn unbind_node(&self, _ctx: &Context, uid: i64, group: &str, ins_id: &str) -> LinkResult<()> {
        let mut inner = self.inner.lock().expect("Poisoned locator lock");

        let key = (uid, group.to_string());

        // Unbinding validates the instance id; a stale unbind must not clear
        // a newer binding.
        match inner.bindings.get(&key) {
            Some(bound) if bound == ins_id => {
                inner.bindings.remove(&key);
            }
            _ => return Ok(()),
        }

        Self::publish(
            &mut inner,
            Event {
                kind: EventKind::UnbindNode,
                uid,
                ins_name: group.to_string(),
                ins_id: ins_id.to_string(),
            },
        );

        Ok(())
    }

    fn watch(&self, _ctx: &Context, _kind: Kind) -> LinkResult<Box<dyn LocateWatcher>> {
        let (tx, rx) = unbounded();

        let mut inner = self.inner.lock().expect("Poisoned locator lock");
        inner.watchers.push(tx);

        Ok(Box::new(MemoryLocateWatcher { rx, stopped: false }))
    }
}

struct MemoryLocateWatcher {
    rx: Receiver<Vec<Event>>,
    stopped: bool,
}

impl LocateWatcher for MemoryLocateWatcher {
    fn next(&mut self) -> LinkResult<Vec<Event>> {
        if self.stopped {
            return Err(LinkError::Canceled);
        }

        self.rx.recv().map_err(|_| LinkError::ConnectionClosed)
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}
