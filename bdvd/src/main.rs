//! `bdvd`: the BDV server daemon. Parses the command line, loads
//! configuration, and dispatches to whichever subcommand was asked for —
//! `start` runs the server, `db-repair` rebuilds damaged filter pools, and
//! `version` just prints build information.

mod broadcast_router;
mod cli;
mod config;
mod error;
mod logging;
mod node_link;
mod notify;
mod server;
mod transport;

use std::path::Path;

use gumdrop::Options;

use cli::{Cli, Command};
use config::Config;

fn main() -> color_eyre::Result<()> {
    logging::install()?;

    let cli = Cli::parse_args_default_or_exit();

    if cli.help {
        println!("{}", Cli::usage());
        return Ok(());
    }

    match cli.command.unwrap_or(Command::Start(cli::StartCmd { help: false })) {
        Command::Version(_) => {
            println!("bdvd {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Command::DbRepair(cmd) => {
            let config = load_config(cli.config.as_deref())?;
            server::run_db_repair(config, cmd.trailing_files)
        }
        Command::Start(_) => {
            let config = load_config(cli.config.as_deref())?;
            server::run_start(config)
        }
    }
}

fn load_config(path: Option<&Path>) -> color_eyre::Result<Config> {
    match path {
        Some(path) => Ok(Config::load(path)?),
        None => Ok(Config::default()),
    }
}
