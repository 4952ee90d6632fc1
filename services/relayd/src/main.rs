use chassis::logging;
use clap::{App, Arg};
use relay::{Config, Server};
use std::fs;

pub fn main() {
    let matches = App::new("Relay Server")
        .version("1.0")
        .about("Runs the chat relay server.")
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file; defaults apply when omitted")
                .required(false),
        )
        .get_matches();

    let config = match matches.value_of("CONFIG_FILE") {
        Some(config_file_path) => serde_json::from_reader(
            fs::File::open(config_file_path).expect("Error opening config file"),
        )
        .expect("Error parsing config file"),
        None => Config::default(),
    };

    // Initialize logging
    let logger = logging::init();

    logging::info!(logger, "starting relay server"; "port" => config.port);

    let server = Server::bind(config, &logger).expect("Error binding relay server");

    if let Err(err) = server.run() {
        logging::crit!(logger, "server terminated"; "error" => %err);
        std::process::exit(1);
    }
}
