use courier_core::config::BrokerConfig;
use courier_core::logging;
use courier_core::net::endpoint::Endpoint;
use std::env;
use std::process;

const CONFIG_PATH: &str = "broker.toml";

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: broker <port>");
        process::exit(1);
    }

    let port: u16 = match args[1].parse() {
        Ok(port) => port,
        Err(_) => {
            eprintln!("broker: invalid port '{}'", args[1]);
            process::exit(1);
        }
    };

    let config = BrokerConfig::load_or_default(CONFIG_PATH);

    let log = match logging::init(&config.logging) {
        Ok(log) => log,
        Err(err) => {
            eprintln!("broker: logger setup failed: {}", err);
            process::exit(1);
        }
    };

    let mut endpoint = match Endpoint::new(port, &config, log.clone()) {
        Ok(endpoint) => endpoint,
        Err(err) => {
            eprintln!("broker: startup failed: {:?}", err);
            process::exit(1);
        }
    };

    if let Err(err) = endpoint.run() {
        logging::error!(log, "event loop failed"; "error" => ?err);
        process::exit(1);
    }
}
