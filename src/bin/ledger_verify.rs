//! ledger_verify - offline verifier for the sealed evidence ledger
//!
//! Proves, without trusting the daemon that wrote it:
//! - every entry is hash-chained to the one before it
//! - every entry is signed by a registered ledger identity (or by `--public-key`)
//! - per-identity sequence numbers are unique

use anyhow::{anyhow, Result};
use clap::Parser;
use rusqlite::{Connection, OpenFlags};

use incident_witness::chain::verifying_key_from_hex;
use incident_witness::evidence::sealed::verify_chain;

#[derive(Parser, Debug)]
#[command(
    name = "ledger_verify",
    about = "Verify the sealed evidence ledger (hash chain + signatures)"
)]
struct Args {
    /// Path to the ledger SQLite DB
    #[arg(long, default_value = "evidence-ledger.db")]
    db: String,

    /// Expected signer (hex-encoded Ed25519 verifying key)
    #[arg(long, value_name = "HEX", conflicts_with = "public_key_file")]
    public_key: Option<String>,

    /// Path to file containing the hex-encoded signer key
    #[arg(long, value_name = "PATH", conflicts_with = "public_key")]
    public_key_file: Option<String>,

    /// Print every verified entry
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let conn = Connection::open_with_flags(&args.db, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| anyhow!("failed to open ledger {}: {}", args.db, e))?;

    let expected = match (&args.public_key, &args.public_key_file) {
        (Some(hex_key), _) => Some(verifying_key_from_hex(hex_key)?),
        (None, Some(path)) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| anyhow!("failed to read public key file {}: {}", path, e))?;
            Some(verifying_key_from_hex(&raw)?)
        }
        (None, None) => None,
    };

    println!("ledger_verify: checking {}", args.db);
    if expected.is_none() {
        println!("signer: any registered identity");
    }

    let count = verify_chain(&conn, expected.as_ref(), |entry| {
        if args.verbose {
            println!(
                "  entry {}: seq={} handle={} label={} hash={} OK",
                entry.id,
                entry.payload.sequence,
                entry.payload.content_handle,
                entry.payload.label,
                &hex::encode(entry.entry_hash)[..16]
            );
        }
    })?;

    println!("verified {} ledger entries", count);
    Ok(())
}
