//! Standalone inspection tool: parses a single `blkNNNNN.dat` file and
//! prints each block record it finds, one JSON object per line.
//!
//! Grounded on [`bdv_store::block_file`]'s file-enumeration/parsing code,
//! reused here rather than reimplemented — this binary is a thin CLI shell
//! around the same `BlockFileReader` the database builder drives.

use std::path::PathBuf;

use structopt::StructOpt;

use bdv_chain::parameters::Network;
use bdv_store::block_file::{enumerate_block_files, BlockFileReader};

#[derive(Debug, StructOpt)]
#[structopt(
    name = "bdv-dump-block",
    about = "Parse a blkNNNNN.dat file and print its block records as JSON"
)]
struct Args {
    /// Path to a single block file, e.g. blocks/blk00000.dat.
    block_file: PathBuf,

    /// Which network's magic bytes to expect at the start of each record.
    #[structopt(long, default_value = "mainnet")]
    network: String,

    /// Print the raw transaction count only, not full transaction bodies.
    #[structopt(long)]
    summary: bool,
}

fn parse_network(s: &str) -> color_eyre::Result<Network> {
    match s.to_ascii_lowercase().as_str() {
        "mainnet" | "main" => Ok(Network::Mainnet),
        "testnet" | "test" => Ok(Network::Testnet),
        "regtest" => Ok(Network::Regtest),
        other => Err(color_eyre::eyre::eyre!("unknown network: {}", other)),
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt::init();

    let args = Args::from_args();
    let network = parse_network(&args.network)?;

    let dir = args
        .block_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = args
        .block_file
        .file_name()
        .ok_or_else(|| color_eyre::eyre::eyre!("not a file path: {:?}", args.block_file))?
        .to_string_lossy()
        .into_owned();

    let files = enumerate_block_files(dir)?;
    let file = files
        .into_iter()
        .find(|f| {
            f.path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                == Some(file_name.clone())
        })
        .ok_or_else(|| color_eyre::eyre::eyre!("{:?} is not a recognized blkNNNNN.dat path", args.block_file))?;

    let reader = BlockFileReader::open(&file, network)?;
    for record in reader.parse_all() {
        let block_data = record.block_data;
        let header = &block_data.block.header;
        let entry = serde_json::json!({
            "file_id": block_data.file_id,
            "offset": block_data.offset,
            "size": block_data.size,
            "hash": block_data.block.hash().to_string(),
            "previous_block_hash": header.previous_block_hash.to_string(),
            "tx_count": block_data.block.transactions.len(),
            "transactions": if args.summary {
                serde_json::Value::Null
            } else {
                serde_json::Value::Array(
                    block_data
                        .block
                        .transactions
                        .iter()
                        .map(|tx| serde_json::json!(tx.hash().to_string()))
                        .collect(),
                )
            },
        });
        println!("{}", entry);
    }

    Ok(())
}
