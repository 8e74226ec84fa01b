use crate::config::{ServeArgs, ServiceConfig};
use crate::error::ServeError;

/// Load and validate the configuration, print the effective values, exit.
pub fn run(args: ServeArgs) -> Result<(), ServeError> {
    let config = ServiceConfig::load(&args.config)?;
    for (key, value) in config.summary() {
        println!("{key:<24} {value}");
    }
    println!("config ok");
    Ok(())
}
