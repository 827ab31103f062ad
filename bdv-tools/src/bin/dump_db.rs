//! Standalone inspection tool: opens a BDV KV store directory read-only
//! and prints its DB-info record plus per-table row counts, or (with
//! `--scr-addr`) the SSH summary and Sub-SSH buckets for one script
//! address.
//!
//! Grounded on `bdv_store::db::KvStore`/`bdv_store::keys`, reused directly
//! rather than reimplemented — this binary is a thin CLI shell around the
//! same store the server opens.

use std::path::PathBuf;

use structopt::StructOpt;

use bdv_chain::parameters::Network;
use bdv_store::config::{Config, DbType};
use bdv_store::keys::{self, HeightX};
use bdv_store::records::SshRecord;
use bdv_store::sled_format::TreeExt;
use bdv_store::KvStore;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bdv-dump-db",
    about = "Inspect a BDV KV store directory read-only"
)]
struct Args {
    /// Path to the sled KV store directory.
    db_dir: PathBuf,

    #[structopt(long, default_value = "mainnet")]
    network: String,

    #[structopt(long, default_value = "narrow")]
    db_type: String,

    /// Hex-encoded script address to print the SSH/Sub-SSH entries for.
    #[structopt(long)]
    scr_addr: Option<String>,
}

fn parse_network(s: &str) -> color_eyre::Result<Network> {
    match s.to_ascii_lowercase().as_str() {
        "mainnet" | "main" => Ok(Network::Mainnet),
        "testnet" | "test" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        other => Err(color_eyre::eyre::eyre!("unknown network: {}", other)),
    }
}

fn parse_db_type(s: &str) -> color_eyre::Result<DbType> {
    match s.to_ascii_lowercase().as_str() {
        "narrow" => Ok(DbType::Narrow),
        "supernode" => Ok(DbType::Supernode),
        other => Err(color_eyre::eyre::eyre!("unknown db type: {}", other)),
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::from_args();
    let config = Config {
        db_dir: args.db_dir.clone(),
        network: parse_network(&args.network)?,
        db_type: parse_db_type(&args.db_type)?,
        ..Config::default()
    };

    let store = KvStore::open(&config)?;
    let info = store.db_info()?;

    println!(
        "{}",
        serde_json::json!({
            "magic": hex::encode(info.magic),
            "db_type": format!("{:?}", info.db_type),
            "top_block_height": info.top_block_height.0,
            "top_scanned_hash": info.top_scanned_hash.map(|h| h.to_string()),
        })
    );

    match args.scr_addr {
        Some(hex_addr) => dump_scr_addr(&store, &hex_addr)?,
        None => dump_table_counts(&store),
    }

    Ok(())
}

fn dump_table_counts(store: &KvStore) {
    let tables: [(&str, &sled::Tree); 10] = [
        ("HEADERS", &store.headers),
        ("BLKDATA", &store.blkdata),
        ("TXHINTS", &store.txhints),
        ("SSH", &store.ssh),
        ("SUBSSH", &store.subssh),
        ("SUBSSH_META", &store.subssh_meta),
        ("STXO", &store.stxo),
        ("ZERO_CONF", &store.zero_conf),
        ("TXFILTERS", &store.txfilters),
        ("SPENTNESS", &store.spentness),
    ];
    for (name, tree) in tables {
        println!("{}: {} rows", name, tree.len());
    }
}

fn dump_scr_addr(store: &KvStore, hex_addr: &str) -> color_eyre::Result<()> {
    let scr_addr = hex::decode(hex_addr)?;

    let ssh_key = keys::ssh_key(&scr_addr);
    match store.ssh.zs_get_untyped::<SshRecord>(&ssh_key)? {
        Some(ssh) => println!(
            "{}",
            serde_json::json!({
                "txio_count": ssh.txio_count,
                "total_unspent": ssh.total_unspent,
                "scanned_up_to": ssh.scanned_up_to,
            })
        ),
        None => println!("no SSH record for scrAddr {}", hex_addr),
    }

    let prefix = keys::sub_ssh_prefix(&scr_addr);
    for entry in store.subssh.scan_prefix(&prefix) {
        let (key, _value) = entry?;
        if let Some((_, height_x)) = keys::scr_addr_from_sub_ssh_key(&key) {
            println!("sub-ssh bucket at height {}", height_x_label(height_x));
        }
    }

    Ok(())
}

fn height_x_label(height_x: HeightX) -> String {
    format!("{}/{}", height_x.height.0, height_x.dup_id)
}
