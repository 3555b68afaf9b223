use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{App, Arg};

use flint::logging;

use crossbar::cluster::{Kind, State};
use crossbar::codec::{Encryptor, JsonCodec, SodiumEncryptor};
use crossbar::context::Context;
use crossbar::dispatcher::WeightedRandomBalancer;
use crossbar::link::{Linker, Options};
use crossbar::locate::MemoryLocator;
use crossbar::registry::{MemoryRegistry, ServiceInstance};
use crossbar::session::SessionHub;
use crossbar::transport::{GateHandler, Server};

use gateway::config::{GatewayConfig, DEFAULT_PORT};
use gateway::provider::HubProvider;

fn main() {
    let matches = App::new("Gateway Service")
        .version("1.0")
        .about("Runs a gate instance of the cluster.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .get_matches();

    let config = GatewayConfig::load(matches.value_of("CONFIG_FILE").unwrap());

    let logger = logging::init();

    let address = config
        .server
        .address
        .clone()
        .unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT));

    let encryptor: Option<Arc<dyn Encryptor>> = config
        .server
        .encryption_key
        .as_ref()
        .map(|key| Arc::new(SodiumEncryptor::new(**key)) as Arc<dyn Encryptor>);

    let hub = Arc::new(SessionHub::new());
    let provider = HubProvider::new(hub.clone(), encryptor.clone(), &logger);

    let mut server = Server::bind(&address, Arc::new(GateHandler::new(provider, &logger)), &logger)
        .expect("Error binding transporter server");
    server.set_heartbeat_interval(Duration::from_secs(config.rpc.heartbeat_secs));
    server.start();

    // Standalone wiring: in-process discovery and location backends. Cluster
    // deployments plug their registry and locator implementations in here.
    let registry = Arc::new(MemoryRegistry::new());
    let locator = Arc::new(MemoryLocator::new());

    let ins_id = format!("gate-{}", flint::time::timestamp_millis());

    registry.register(ServiceInstance {
        id: ins_id.clone(),
        kind: Kind::Gate,
        name: "gate".to_string(),
        alias: String::new(),
        state: State::Work,
        address: server.listen_addr().to_string(),
        weight: config.server.weight,
        routes: Vec::new(),
        events: Vec::new(),
        services: Vec::new(),
    });

    let linker = Arc::new(Linker::new(
        Options {
            ins_id: ins_id.clone(),
            ins_kind: Kind::Gate,
            codec: Arc::new(JsonCodec),
            encryptor,
            locator: Some(locator),
            registry,
            balancer: Arc::new(WeightedRandomBalancer),
            call_timeout: Duration::from_millis(config.rpc.timeout_ms),
            heartbeat_interval: Duration::from_secs(config.rpc.heartbeat_secs),
        },
        &logger,
    ));

    let ctx = Context::background();
    linker
        .clone()
        .watch_cluster_instance(&ctx)
        .expect("Error starting cluster instance watch");
    linker
        .clone()
        .watch_user_locate(&ctx)
        .expect("Error starting user locate watch");

    logging::info!(logger, "gateway running";
                   "ins_id" => ins_id.as_str(),
                   "listen" => server.listen_addr().to_string());

    loop {
        thread::park();
    }
}
