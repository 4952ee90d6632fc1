use clap::{App, Arg};
use relay::Config;
use std::fs;

/// Writes the default server configuration as JSON, either to stdout or to
/// the supplied path.
pub fn main() {
    let matches = App::new("Relay Config Generator")
        .version("1.0")
        .about("Emits the default relay server configuration.")
        .arg(
            Arg::with_name("OUTPUT_FILE")
                .help("Path to write the config file to; stdout when omitted")
                .required(false),
        )
        .get_matches();

    let config = Config::default();
    let rendered = serde_json::to_string_pretty(&config).expect("Error serializing config");

    match matches.value_of("OUTPUT_FILE") {
        Some(path) => fs::write(path, rendered).expect("Error writing config file"),
        None => println!("{}", rendered),
    }
}
