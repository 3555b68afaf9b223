use clap::{App, Arg};

use gateway::config::GatewayConfig;

fn main() {
    let matches = App::new("Gateway Config Generator")
        .version("1.0")
        .about("Writes the default gateway configuration file.")
        .arg(
            Arg::with_name("OUT_FILE")
                .help("Path to write the configuration to")
                .required(true),
        )
        .get_matches();

    let path = matches.value_of("OUT_FILE").unwrap();

    GatewayConfig::default().save(path);

    println!("Default configuration written to {}", path);
}
