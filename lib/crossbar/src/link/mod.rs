//! The linker: public façade of the link layer. It resolves user locations
//! through the cache and the locator, routes RPCs through the dispatcher and
//! the client pool, retries once on stale locations and keeps the location
//! cache consistent with locator events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::Duration;

use hashbrown::HashMap;
use serde_json::Value;

use flint::logging;

use crate::cluster::{Kind, State};
use crate::codec::{Codec, Encryptor};
use crate::context::Context;
use crate::dispatcher::{Balancer, Dispatcher};
use crate::errors::{LinkError, LinkResult};
use crate::locate::{Event as LocateEvent, EventKind, Locator};
use crate::packet;
use crate::registry::{Registry, ServiceInstance};
use crate::transport::{BuilderOptions, NodeBuilder, NodeClient};

const WATCH_RETRY_BACKOFF: Duration = Duration::from_millis(100);

pub struct Options {
    pub ins_id: String,
    pub ins_kind: Kind,
    pub codec: Arc<dyn Codec>,
    pub encryptor: Option<Arc<dyn Encryptor>>,
    pub locator: Option<Arc<dyn Locator>>,
    pub registry: Arc<dyn Registry>,
    pub balancer: Arc<dyn Balancer>,
    /// Applied to calls whose context carries no deadline.
    pub call_timeout: Duration,
    pub heartbeat_interval: Duration,
}

/// A structured application message to pack for delivery.
pub struct Message {
    pub seq: i32,
    pub route: i32,
    pub data: Value,
}

/// Payload accepted by deliver.
pub enum DeliverBody {
    /// Pre-packed bytes; bypasses codec and encryption.
    Raw(Vec<u8>),
    Message(Message),
}

pub struct DeliverArgs {
    pub route: i32,
    pub cid: i64,
    pub uid: i64,
    /// Explicit target instance; the stateful location path resolves one when
    /// absent.
    pub nid: Option<String>,
    pub body: DeliverBody,
}

#[derive(Debug, Copy, Clone)]
pub struct TriggerArgs {
    pub event: i32,
    pub cid: i64,
    pub uid: i64,
}

pub struct Linker {
    opts: Options,
    builder: NodeBuilder,
    dispatcher: Dispatcher,
    // uid -> group -> instance id
    sources: RwLock<HashMap<i64, HashMap<String, String>>>,
    shutdown: AtomicBool,
    log: logging::Logger,
}

impl Linker {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(opts: Options, log: L) -> Linker {
        let linker_log = match log.into() {
            Some(log) => log.new(logging::o!("ins_id" => opts.ins_id.clone())),
            _ => logging::discard(),
        };

        let mut builder_opts = BuilderOptions::new(&opts.ins_id, opts.ins_kind);
        builder_opts.call_timeout = opts.call_timeout;
        builder_opts.heartbeat_interval = opts.heartbeat_interval;

        let builder = NodeBuilder::new(builder_opts, &linker_log);
        let dispatcher = Dispatcher::new(opts.balancer.clone());

        Linker {
            opts,
            builder,
            dispatcher,
            sources: RwLock::new(HashMap::new()),
            shutdown: AtomicBool::new(false),
            log: linker_log,
        }
    }

    /// Resolves where the user is hosted within the group and whether that is
    /// the given instance. Consults the cache before the locator.
    pub fn ask(&self, ctx: &Context, uid: i64, group: &str, nid: &str) -> LinkResult<(String, bool)> {
        let locator = self.opts.locator.as_ref().ok_or(LinkError::MissingLocator)?;

        if let Some(ins_id) = self.get_source(uid, group) {
            let here = ins_id == nid;
            return Ok((ins_id, here));
        }

        let ins_id = locator
            .locate_node(ctx, uid, group)?
            .ok_or(LinkError::NotFoundUserLocation)?;

        self.save_source(uid, group, &ins_id);

        let here = ins_id == nid;
        Ok((ins_id, here))
    }

    /// Resolves where the user is hosted within the group. Consults the cache
    /// before the locator and caches locator answers.
    pub fn locate(&self, ctx: &Context, uid: i64, group: &str) -> LinkResult<String> {
        let locator = self.opts.locator.as_ref().ok_or(LinkError::MissingLocator)?;

        if let Some(nid) = self.get_source(uid, group) {
            return Ok(nid);
        }

        let nid = locator
            .locate_node(ctx, uid, group)?
            .ok_or(LinkError::NotFoundUserLocation)?;

        self.save_source(uid, group, &nid);

        Ok(nid)
    }

    /// True when the dispatcher knows an endpoint with the given instance id.
    pub fn has(&self, nid: &str) -> bool {
        self.dispatcher.find_endpoint(nid).is_ok()
    }

    /// Binds the user to an instance within the group, overwriting any prior
    /// binding for the group.
    pub fn bind(&self, ctx: &Context, uid: i64, group: &str, nid: &str) -> LinkResult<()> {
        let locator = self.opts.locator.as_ref().ok_or(LinkError::MissingLocator)?;

        locator.bind_node(ctx, uid, group, nid)?;

        self.save_source(uid, group, nid);

        Ok(())
    }

    /// Unbinds the user from an instance within the group. The cache entry is
    /// dropped only when it still points at the given instance.
    pub fn unbind(&self, ctx: &Context, uid: i64, group: &str, nid: &str) -> LinkResult<()> {
        let locator = self.opts.locator.as_ref().ok_or(LinkError::MissingLocator)?;

        locator.unbind_node(ctx, uid, group, nid)?;

        self.delete_source(uid, group, nid);

        Ok(())
    }

    /// Sends a message to a node for processing, either to the explicit
    /// target or along the route's location path. A user with no known
    /// location is simply offline; that case is swallowed.
    pub fn deliver(&self, ctx: &Context, args: DeliverArgs) -> LinkResult<()> {
        let message = match &args.body {
            DeliverBody::Raw(raw) => raw.clone(),
            DeliverBody::Message(message) => self.pack_message(message)?,
        };

        if let Some(nid) = &args.nid {
            let client = self.build_client(nid)?;

            return match client.deliver(ctx, args.cid, args.uid, &message)? {
                true => Err(LinkError::NotFoundUserLocation),
                false => Ok(()),
            };
        }

        let result = self.do_rpc(ctx, args.route, args.uid, |ctx, client| {
            match client.deliver(ctx, args.cid, args.uid, &message) {
                Ok(true) => (true, Err(LinkError::NotFoundUserLocation)),
                Ok(false) => (false, Ok(())),
                Err(err) => (false, Err(err)),
            }
        });

        match result {
            Err(LinkError::NotFoundUserLocation) => Ok(()),
            other => other,
        }
    }

    /// Broadcasts an event to every endpoint registered under it. All RPCs
    /// run concurrently; the first error wins but only after every endpoint
    /// has answered.
    pub fn trigger(&self, ctx: &Context, args: TriggerArgs) -> LinkResult<()> {
        let event = self.dispatcher.find_event(args.event)?;

        thread::scope(|scope| {
            let workers: Vec<_> = event
                .iter_endpoints()
                .map(|ep| {
                    let client = self.builder.build(&ep.address);

                    scope.spawn(move || client.trigger(ctx, args.event, args.cid, args.uid))
                })
                .collect();

            let mut first_err = None;

            for worker in workers {
                if let Err(err) = worker.join().expect("Trigger worker panicked") {
                    first_err.get_or_insert(err);
                }
            }

            match first_err {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    /// Fetches the registered node instances, optionally filtered by state.
    pub fn fetch_node_list(
        &self,
        ctx: &Context,
        states: &[State],
    ) -> LinkResult<Vec<ServiceInstance>> {
        let services = self.opts.registry.services(ctx, Kind::Node)?;

        if states.is_empty() {
            return Ok(services);
        }

        Ok(services
            .into_iter()
            .filter(|service| states.contains(&service.state))
            .collect())
    }

    pub fn get_state(&self, ctx: &Context, nid: &str) -> LinkResult<State> {
        self.build_client(nid)?.get_state(ctx)
    }

    pub fn set_state(&self, ctx: &Context, nid: &str, state: State) -> LinkResult<()> {
        self.build_client(nid)?.set_state(ctx, state)
    }

    /// Spawns the watcher applying user-location events to the cache. The
    /// thread retries on watch errors and exits on shutdown.
    pub fn watch_user_locate(self: Arc<Self>, ctx: &Context) -> LinkResult<()> {
        let locator = match &self.opts.locator {
            Some(locator) => locator.clone(),
            None => return Ok(()),
        };

        let mut watcher = locator.watch(ctx, self.opts.ins_kind)?;
        let linker = self;
        let ctx = ctx.clone();

        thread::Builder::new()
            .name("crossbar-locate-watch".to_string())
            .spawn(move || {
                loop {
                    if linker.shutdown.load(Ordering::Acquire) || ctx.is_canceled() {
                        break;
                    }

                    match watcher.next() {
                        Ok(events) => {
                            for event in &events {
                                linker.apply_locate_event(event);
                            }
                        }
                        Err(err) => {
                            if linker.shutdown.load(Ordering::Acquire) || ctx.is_canceled() {
                                break;
                            }

                            logging::warn!(linker.log, "user locate watch failed"; "error" => %err);
                            thread::sleep(WATCH_RETRY_BACKOFF);
                        }
                    }
                }

                watcher.stop();
            })
            .expect("Error spawning locate watch thread");

        Ok(())
    }

    /// Spawns the watcher feeding registry snapshots to the dispatcher. The
    /// thread retries on watch errors and exits on shutdown.
    pub fn watch_cluster_instance(self: Arc<Self>, ctx: &Context) -> LinkResult<()> {
        let mut watcher = self.opts.registry.watch(ctx, Kind::Node)?;
        let linker = self;
        let ctx = ctx.clone();

        thread::Builder::new()
            .name("crossbar-cluster-watch".to_string())
            .spawn(move || {
                loop {
                    if linker.shutdown.load(Ordering::Acquire) || ctx.is_canceled() {
                        break;
                    }

                    match watcher.next() {
                        Ok(services) => {
                            logging::debug!(linker.log, "cluster instances replaced";
                                            "count" => services.len());
                            linker.dispatcher.replace_services(&services);
                        }
                        Err(err) => {
                            if linker.shutdown.load(Ordering::Acquire) || ctx.is_canceled() {
                                break;
                            }

                            logging::warn!(linker.log, "cluster instance watch failed";
                                           "error" => %err);
                            thread::sleep(WATCH_RETRY_BACKOFF);
                        }
                    }
                }

                watcher.stop();
            })
            .expect("Error spawning cluster watch thread");

        Ok(())
    }

    /// Stops the watcher threads at their next wakeup.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    /// The retry core. Resolves the route, locates the user for stateful
    /// routes, invokes `f` with a pooled client and retries once when the
    /// callee asks for a re-locate. A re-locate that lands on the same
    /// instance hands back the callee's prior reply.
    fn do_rpc<T, F>(&self, ctx: &Context, route_id: i32, uid: i64, f: F) -> LinkResult<T>
    where
        F: Fn(&Context, &NodeClient) -> (bool, LinkResult<T>),
    {
        let route = self.dispatcher.find_route(route_id)?;

        if self.opts.ins_kind == Kind::Gate && route.internal() {
            return Err(LinkError::IllegalRequest);
        }

        let mut prev: Option<String> = None;
        let mut last: Option<LinkResult<T>> = None;

        for _ in 0..2 {
            let nid = if route.stateful() {
                let nid = self.locate(ctx, uid, route.group())?;

                if prev.as_deref() == Some(nid.as_str()) {
                    return last.expect("Relocation matched without a prior reply");
                }

                prev = Some(nid.clone());
                Some(nid)
            } else {
                None
            };

            let ep = route.find_endpoint(nid.as_deref())?;
            let client = self.builder.build(&ep.address);

            let (retry, reply) = f(ctx, &client);

            if retry {
                if route.stateful() {
                    if let Some(prev) = prev.as_deref() {
                        self.delete_source(uid, route.group(), prev);
                    }
                }

                last = Some(reply);
                continue;
            }

            return reply;
        }

        last.expect("Retry loop ended without a reply")
    }

    fn build_client(&self, nid: &str) -> LinkResult<Arc<NodeClient>> {
        if nid.is_empty() {
            return Err(LinkError::InvalidNid);
        }

        let ep = self.dispatcher.find_endpoint(nid)?;

        Ok(self.builder.build(&ep.address))
    }

    /// Encodes and optionally encrypts a structured message, wrapping it in
    /// the application-level frame.
    fn pack_message(&self, message: &Message) -> LinkResult<Vec<u8>> {
        let buffer = if message.data.is_null() {
            Vec::new()
        } else {
            let data = self.opts.codec.marshal(&message.data)?;

            match &self.opts.encryptor {
                Some(encryptor) => encryptor.encrypt(&data)?,
                None => data,
            }
        };

        packet::pack_message(&packet::Message {
            seq: message.seq,
            route: message.route,
            buffer,
        })
    }

    fn apply_locate_event(&self, event: &LocateEvent) {
        match event.kind {
            EventKind::BindNode => self.save_source(event.uid, &event.ins_name, &event.ins_id),
            EventKind::UnbindNode => self.delete_source(event.uid, &event.ins_name, &event.ins_id),
        }
    }

    fn save_source(&self, uid: i64, group: &str, nid: &str) {
        let mut sources = self.sources.write().expect("Poisoned sources lock");

        sources
            .entry(uid)
            .or_insert_with(HashMap::new)
            .insert(group.to_string(), nid.to_string());
    }

    /// Evicts the cached location only when it still points at `nid`; a stale
    /// eviction must not clear a newer binding.
    fn delete_source(&self, uid: i64, group: &str, nid: &str) {
        let mut sources = self.sources.write().expect("Poisoned sources lock");

        let groups = match sources.get_mut(&uid) {
            Some(groups) => groups,
            None => return,
        };

        match groups.get(group) {
            Some(current) if current == nid => {}
            _ => return,
        }

        groups.remove(group);

        if groups.is_empty() {
            sources.remove(&uid);
        }
    }

    fn get_source(&self, uid: i64, group: &str) -> Option<String> {
        self.sources
            .read()
            .expect("Poisoned sources lock")
            .get(&uid)
            .and_then(|groups| groups.get(group))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonCodec;
    use crate::dispatcher::RandomBalancer;
    use crate::locate::MemoryLocator;
    use crate::registry::{MemoryRegistry, RouteEntry};
    use crate::transport::client::{DEFAULT_CALL_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};
    use crate::transport::{NodeHandler, NodeProvider, Server};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Instant;

    fn node_instance(id: &str, addr: &str, routes: &[(i32, bool, bool)], events: &[i32]) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            kind: Kind::Node,
            name: "chat".to_string(),
            alias: String::new(),
            state: State::Work,
            address: addr.to_string(),
            weight: 1,
            routes: routes
                .iter()
                .map(|(rid, stateful, internal)| RouteEntry {
                    id: *rid,
                    stateful: *stateful,
                    internal: *internal,
                    group: None,
                })
                .collect(),
            events: events.to_vec(),
            services: Vec::new(),
        }
    }

    fn linker_with(
        kind: Kind,
        locator: Option<Arc<dyn Locator>>,
        registry: Arc<dyn Registry>,
    ) -> Arc<Linker> {
        Arc::new(Linker::new(
            Options {
                ins_id: "ins-1".to_string(),
                ins_kind: kind,
                codec: Arc::new(JsonCodec),
                encryptor: None,
                locator,
                registry,
                balancer: Arc::new(RandomBalancer),
                call_timeout: DEFAULT_CALL_TIMEOUT,
                heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            },
            None,
        ))
    }

    fn wait_until<F: Fn() -> bool>(cond: F, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            if cond() {
                return true;
            }

            thread::sleep(Duration::from_millis(10));
        }

        false
    }

    #[test]
    fn test_locate_without_locator() {
        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        assert_eq!(
            linker.locate(&ctx, 42, "chat").unwrap_err(),
            LinkError::MissingLocator
        );
        assert_eq!(
            linker.ask(&ctx, 42, "chat", "n1").unwrap_err(),
            LinkError::MissingLocator
        );
        assert_eq!(
            linker.bind(&ctx, 42, "chat", "n1").unwrap_err(),
            LinkError::MissingLocator
        );
    }

    #[test]
    fn test_locate_unknown_user() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(Kind::Node, Some(locator), Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        assert_eq!(
            linker.locate(&ctx, 42, "chat").unwrap_err(),
            LinkError::NotFoundUserLocation
        );
    }

    #[test]
    fn test_locate_prefers_cache() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Node,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker.bind(&ctx, 42, "chat", "node-a").unwrap();

        // Rebind in the locator behind the cache's back; the cache answer
        // wins until it is evicted.
        locator.bind_node(&ctx, 42, "chat", "node-b").unwrap();

        assert_eq!(linker.locate(&ctx, 42, "chat").unwrap(), "node-a");

        let (nid, here) = linker.ask(&ctx, 42, "chat", "node-a").unwrap();
        assert_eq!(nid, "node-a");
        assert!(here);
    }

    #[test]
    fn test_locate_caches_locator_answer() {
        let locator = Arc::new(MemoryLocator::new());
        let ctx = Context::background();
        locator.bind_node(&ctx, 42, "chat", "node-a").unwrap();

        let linker = linker_with(
            Kind::Node,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );

        assert_eq!(linker.locate(&ctx, 42, "chat").unwrap(), "node-a");
        assert_eq!(linker.get_source(42, "chat").unwrap(), "node-a");
    }

    #[test]
    fn test_unbind_evicts_only_matching_nid() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Node,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker.bind(&ctx, 42, "chat", "node-a").unwrap();
        linker.bind(&ctx, 42, "chat", "node-b").unwrap();

        // Unbinding the stale owner leaves the newer binding alone.
        linker.unbind(&ctx, 42, "chat", "node-a").unwrap();
        assert_eq!(linker.get_source(42, "chat").unwrap(), "node-b");

        linker.unbind(&ctx, 42, "chat", "node-b").unwrap();
        assert!(linker.get_source(42, "chat").is_none());
    }

    #[test]
    fn test_unbind_event_race_leaves_cache_empty() {
        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));

        linker.save_source(42, "chat", "node-a");

        linker.apply_locate_event(&LocateEvent {
            kind: EventKind::UnbindNode,
            uid: 42,
            ins_name: "chat".to_string(),
            ins_id: "node-a".to_string(),
        });
        assert!(linker.get_source(42, "chat").is_none());

        // A late unbind for another instance must not resurrect anything.
        linker.apply_locate_event(&LocateEvent {
            kind: EventKind::UnbindNode,
            uid: 42,
            ins_name: "chat".to_string(),
            ins_id: "node-b".to_string(),
        });
        assert!(linker.get_source(42, "chat").is_none());
    }

    #[test]
    fn test_late_unbind_does_not_evict_newer_bind() {
        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));

        linker.apply_locate_event(&LocateEvent {
            kind: EventKind::BindNode,
            uid: 42,
            ins_name: "chat".to_string(),
            ins_id: "node-b".to_string(),
        });

        linker.apply_locate_event(&LocateEvent {
            kind: EventKind::UnbindNode,
            uid: 42,
            ins_name: "chat".to_string(),
            ins_id: "node-a".to_string(),
        });

        assert_eq!(linker.get_source(42, "chat").unwrap(), "node-b");
    }

    #[test]
    fn test_do_rpc_stateful_retry_relocates() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Gate,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker.dispatcher.replace_services(&[
            node_instance("node-a", "10.1.0.1:1", &[(5, true, false)], &[]),
            node_instance("node-b", "10.1.0.2:1", &[(5, true, false)], &[]),
        ]);

        linker.bind(&ctx, 42, "chat", "node-a").unwrap();

        // Another instance rebinding; visible on the next locator query.
        locator.bind_node(&ctx, 42, "chat", "node-b").unwrap();

        let calls = AtomicUsize::new(0);
        let result = linker.do_rpc(&ctx, 5, 42, |_, client| {
            calls.fetch_add(1, Ordering::SeqCst);

            if client.raw().addr() == "10.1.0.1:1" {
                (true, Err(LinkError::NotFoundUserLocation))
            } else {
                (false, Ok("delivered"))
            }
        });

        assert_eq!(result.unwrap(), "delivered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(linker.get_source(42, "chat").unwrap(), "node-b");
    }

    #[test]
    fn test_do_rpc_gives_up_when_relocation_matches() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Gate,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker
            .dispatcher
            .replace_services(&[node_instance("node-a", "10.1.0.1:1", &[(5, true, false)], &[])]);

        linker.bind(&ctx, 42, "chat", "node-a").unwrap();

        let calls = AtomicUsize::new(0);
        let result: LinkResult<&str> = linker.do_rpc(&ctx, 5, 42, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            (true, Err(LinkError::NotFoundUserLocation))
        });

        // The locator still points at the same instance; the prior reply is
        // handed back and the callee is not invoked again.
        assert_eq!(result.unwrap_err(), LinkError::NotFoundUserLocation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_do_rpc_stateless_retries_at_most_twice() {
        let linker = linker_with(Kind::Gate, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        linker
            .dispatcher
            .replace_services(&[node_instance("node-a", "10.1.0.1:1", &[(5, false, false)], &[])]);

        let calls = AtomicUsize::new(0);
        let result: LinkResult<()> = linker.do_rpc(&ctx, 5, 42, |_, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            (true, Err(LinkError::Remote(crate::codes::Code::InternalError)))
        });

        assert_eq!(
            result.unwrap_err(),
            LinkError::Remote(crate::codes::Code::InternalError)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_do_rpc_rejects_internal_route_on_gate() {
        let linker = linker_with(Kind::Gate, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        linker
            .dispatcher
            .replace_services(&[node_instance("node-a", "10.1.0.1:1", &[(5, false, true)], &[])]);

        let result: LinkResult<()> = linker.do_rpc(&ctx, 5, 42, |_, _| (false, Ok(())));

        assert_eq!(result.unwrap_err(), LinkError::IllegalRequest);
    }

    #[test]
    fn test_do_rpc_unknown_route() {
        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        let result: LinkResult<()> = linker.do_rpc(&ctx, 9, 42, |_, _| (false, Ok(())));

        assert_eq!(result.unwrap_err(), LinkError::NotFoundRoute);
    }

    struct DeliverSink {
        hosted_uid: i64,
        delivered: Arc<Mutex<Vec<(i64, i64, Vec<u8>)>>>,
    }

    impl NodeProvider for DeliverSink {
        fn deliver(&self, cid: i64, uid: i64, message: Vec<u8>) -> LinkResult<()> {
            if uid != self.hosted_uid {
                return Err(LinkError::NotFoundUserLocation);
            }

            self.delivered.lock().unwrap().push((cid, uid, message));
            Ok(())
        }

        fn trigger(&self, _event: i32, _cid: i64, _uid: i64) -> LinkResult<()> {
            Ok(())
        }

        fn get_state(&self) -> LinkResult<State> {
            Ok(State::Work)
        }

        fn set_state(&self, _state: State) -> LinkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_deliver_end_to_end() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let server = Server::bind(
            "127.0.0.1:0",
            Arc::new(NodeHandler::new(
                DeliverSink {
                    hosted_uid: 42,
                    delivered: delivered.clone(),
                },
                None,
            )),
            None,
        )
        .unwrap();
        server.start();

        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Gate,
            Some(locator),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker.dispatcher.replace_services(&[node_instance(
            "node-a",
            &server.listen_addr().to_string(),
            &[(5, true, false)],
            &[],
        )]);
        linker.bind(&ctx, 42, "chat", "node-a").unwrap();

        linker
            .deliver(
                &ctx,
                DeliverArgs {
                    route: 5,
                    cid: 7,
                    uid: 42,
                    nid: None,
                    body: DeliverBody::Message(Message {
                        seq: 1,
                        route: 301,
                        data: json!({"text": "welcome"}),
                    }),
                },
            )
            .unwrap();

        let recorded = delivered.lock().unwrap();
        assert_eq!(recorded.len(), 1);

        let (cid, uid, ref bytes) = recorded[0];
        assert_eq!(cid, 7);
        assert_eq!(uid, 42);

        let unpacked = packet::unpack_message(bytes).unwrap();
        assert_eq!(unpacked.route, 301);
        assert_eq!(unpacked.seq, 1);
        assert_eq!(
            JsonCodec.unmarshal(&unpacked.buffer).unwrap(),
            json!({"text": "welcome"})
        );

        server.stop();
    }

    #[test]
    fn test_deliver_swallows_offline_user() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Gate,
            Some(locator),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker
            .dispatcher
            .replace_services(&[node_instance("node-a", "10.1.0.1:1", &[(5, true, false)], &[])]);

        // No binding anywhere: the user is offline, not an error.
        linker
            .deliver(
                &ctx,
                DeliverArgs {
                    route: 5,
                    cid: 7,
                    uid: 42,
                    nid: None,
                    body: DeliverBody::Raw(b"payload".to_vec()),
                },
            )
            .unwrap();
    }

    #[test]
    fn test_deliver_rejects_unknown_explicit_nid() {
        let linker = linker_with(Kind::Gate, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        let err = linker
            .deliver(
                &ctx,
                DeliverArgs {
                    route: 5,
                    cid: 7,
                    uid: 42,
                    nid: Some("node-x".to_string()),
                    body: DeliverBody::Raw(b"payload".to_vec()),
                },
            )
            .unwrap_err();

        assert_eq!(err, LinkError::NotFoundEndpoint);
    }

    struct TriggerSink {
        fail: bool,
        fired: Arc<AtomicUsize>,
    }

    impl NodeProvider for TriggerSink {
        fn deliver(&self, _cid: i64, _uid: i64, _message: Vec<u8>) -> LinkResult<()> {
            Ok(())
        }

        fn trigger(&self, _event: i32, _cid: i64, _uid: i64) -> LinkResult<()> {
            self.fired.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                Err(LinkError::IllegalRequest)
            } else {
                Ok(())
            }
        }

        fn get_state(&self) -> LinkResult<State> {
            Ok(State::Work)
        }

        fn set_state(&self, _state: State) -> LinkResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_trigger_fanout_first_error_after_all_complete() {
        let fired: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        let servers: Vec<Server> = (0..3)
            .map(|idx| {
                let server = Server::bind(
                    "127.0.0.1:0",
                    Arc::new(NodeHandler::new(
                        TriggerSink {
                            fail: idx == 1,
                            fired: fired[idx].clone(),
                        },
                        None,
                    )),
                    None,
                )
                .unwrap();
                server.start();
                server
            })
            .collect();

        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        let instances: Vec<ServiceInstance> = servers
            .iter()
            .enumerate()
            .map(|(idx, server)| {
                node_instance(
                    &format!("node-{}", idx),
                    &server.listen_addr().to_string(),
                    &[],
                    &[9],
                )
            })
            .collect();
        linker.dispatcher.replace_services(&instances);

        let err = linker
            .trigger(
                &ctx,
                TriggerArgs {
                    event: 9,
                    cid: 1,
                    uid: 1,
                },
            )
            .unwrap_err();

        assert_eq!(err, LinkError::Remote(crate::codes::Code::IllegalRequest));

        // Every endpoint was reached despite the failure.
        for counter in &fired {
            assert_eq!(counter.load(Ordering::SeqCst), 1);
        }

        for server in &servers {
            server.stop();
        }
    }

    #[test]
    fn test_trigger_unknown_event() {
        let linker = linker_with(Kind::Node, None, Arc::new(MemoryRegistry::new()));
        let ctx = Context::background();

        assert_eq!(
            linker
                .trigger(&ctx, TriggerArgs { event: 9, cid: 1, uid: 1 })
                .unwrap_err(),
            LinkError::NotFoundEvent
        );
    }

    #[test]
    fn test_fetch_node_list_filters_by_state() {
        let registry = Arc::new(MemoryRegistry::new());

        let mut working = node_instance("node-a", "10.1.0.1:1", &[], &[]);
        working.state = State::Work;
        registry.register(working);

        let mut busy = node_instance("node-b", "10.1.0.2:1", &[], &[]);
        busy.state = State::Busy;
        registry.register(busy);

        let linker = linker_with(Kind::Gate, None, registry);
        let ctx = Context::background();

        assert_eq!(linker.fetch_node_list(&ctx, &[]).unwrap().len(), 2);

        let busy_only = linker.fetch_node_list(&ctx, &[State::Busy]).unwrap();
        assert_eq!(busy_only.len(), 1);
        assert_eq!(busy_only[0].id, "node-b");
    }

    #[test]
    fn test_has_follows_dispatcher() {
        let linker = linker_with(Kind::Gate, None, Arc::new(MemoryRegistry::new()));

        assert!(!linker.has("node-a"));

        linker
            .dispatcher
            .replace_services(&[node_instance("node-a", "10.1.0.1:1", &[], &[])]);

        assert!(linker.has("node-a"));
    }

    #[test]
    fn test_watch_cluster_instance_feeds_dispatcher() {
        let registry = Arc::new(MemoryRegistry::new());
        let linker = linker_with(Kind::Gate, None, registry.clone());
        let ctx = Context::background();

        linker.clone().watch_cluster_instance(&ctx).unwrap();

        registry.register(node_instance("node-a", "10.1.0.1:1", &[(5, false, false)], &[]));

        assert!(wait_until(
            || linker.has("node-a"),
            Duration::from_secs(2)
        ));

        registry.deregister("node-a");

        assert!(wait_until(
            || !linker.has("node-a"),
            Duration::from_secs(2)
        ));

        linker.shutdown();
    }

    #[test]
    fn test_watch_user_locate_maintains_cache() {
        let locator = Arc::new(MemoryLocator::new());
        let linker = linker_with(
            Kind::Node,
            Some(locator.clone()),
            Arc::new(MemoryRegistry::new()),
        );
        let ctx = Context::background();

        linker.clone().watch_user_locate(&ctx).unwrap();

        locator.bind_node(&ctx, 42, "chat", "node-a").unwrap();

        assert!(wait_until(
            || linker.get_source(42, "chat").as_deref() == Some("node-a"),
            Duration::from_secs(2)
        ));

        locator.unbind_node(&ctx, 42, "chat", "node-a").unwrap();

        assert!(wait_until(
            || linker.get_source(42, "chat").is_none(),
            Duration::from_secs(2)
        ));

        linker.shutdown();
    }
}
