//! The `bdvd` command line: `start` runs the server, `db-repair` rebuilds
//! tx filters and STXO records without serving clients, `version` prints
//! build information and exits.

use std::path::PathBuf;

use gumdrop::Options;

#[derive(Debug, Options)]
pub struct Cli {
    #[options(help = "print this help message")]
    pub help: bool,

    #[options(help = "path to the TOML configuration file", meta = "PATH")]
    pub config: Option<PathBuf>,

    #[options(command)]
    pub command: Option<Command>,
}

#[derive(Debug, Options)]
pub enum Command {
    #[options(help = "open the store, scan the block directory, and serve BDV sessions")]
    Start(StartCmd),
    #[options(help = "rebuild damaged tx filters and STXO records, then exit")]
    DbRepair(DbRepairCmd),
    #[options(help = "print version information and exit")]
    Version(VersionCmd),
}

#[derive(Debug, Options)]
pub struct StartCmd {
    #[options(help = "print help for this command")]
    pub help: bool,
}

#[derive(Debug, Options)]
pub struct DbRepairCmd {
    #[options(help = "print help for this command")]
    pub help: bool,

    #[options(help = "trailing block files to rebuild filters for", default = "5")]
    pub trailing_files: u32,
}

#[derive(Debug, Options)]
pub struct VersionCmd {
    #[options(help = "print help for this command")]
    pub help: bool,
}
