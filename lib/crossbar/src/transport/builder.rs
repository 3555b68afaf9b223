//! The per-address client pool. At most one live client exists per
//! destination; concurrent builds for the same address collapse to a single
//! construction, and a client evicts its own entry when its connection
//! permanently closes so the next build reconstructs.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use hashbrown::HashMap;

use flint::logging;

use crate::cluster::Kind;
use crate::transport::client::{
    Client, ClientOptions, DEFAULT_CALL_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL,
};

pub struct BuilderOptions {
    pub ins_id: String,
    pub ins_kind: Kind,
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
}

impl BuilderOptions {
    pub fn new(ins_id: &str, ins_kind: Kind) -> BuilderOptions {
        BuilderOptions {
            ins_id: ins_id.to_string(),
            ins_kind,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }
}

/// Address-keyed pool of typed clients. `T` wraps the raw framed client with
/// a per-peer-kind API.
pub struct Builder<T> {
    opts: BuilderOptions,
    clients: Arc<RwLock<HashMap<String, Arc<T>>>>,
    log: logging::Logger,
}

impl<T: From<Arc<Client>> + Send + Sync + 'static> Builder<T> {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        opts: BuilderOptions,
        log: L,
    ) -> Builder<T> {
        let builder_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::discard(),
        };

        Builder {
            opts,
            clients: Arc::new(RwLock::new(HashMap::new())),
            log: builder_log,
        }
    }

    /// Returns the pooled client for the address, constructing it when
    /// absent. Construction never dials; dial failures surface on the first
    /// call or send.
    pub fn build(&self, addr: &str) -> Arc<T> {
        if let Some(client) = self
            .clients
            .read()
            .expect("Poisoned client pool lock")
            .get(addr)
        {
            return client.clone();
        }

        let mut clients = self.clients.write().expect("Poisoned client pool lock");

        // Lost the construction race to another caller.
        if let Some(client) = clients.get(addr) {
            return client.clone();
        }

        let mut copts = ClientOptions::new(addr, &self.opts.ins_id, self.opts.ins_kind);
        copts.call_timeout = self.opts.call_timeout;
        copts.heartbeat_interval = self.opts.heartbeat_interval;

        let raw = Client::new(copts, &self.log);

        // The client holds only this callback, never the builder; the weak
        // upgrade fails harmlessly once the pool itself is gone.
        let pool = Arc::downgrade(&self.clients);
        let key = addr.to_string();
        raw.set_close_handler(Box::new(move || {
            if let Some(pool) = pool.upgrade() {
                pool.write().expect("Poisoned client pool lock").remove(&key);
            }
        }));

        let client = Arc::new(T::from(Arc::new(raw)));
        clients.insert(addr.to_string(), client.clone());

        client
    }

    /// Number of pooled clients.
    pub fn size(&self) -> usize {
        self.clients
            .read()
            .expect("Poisoned client pool lock")
            .len()
    }
}
