use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, Command};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

use consent_gate::audit::{audit_merkle_root, find_tampered_entries, verify_chain, AuditTrail, ChainVerification};
use consent_gate::storage::SqliteStore;

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("verify-audit-chain")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Verify a citizen's consent audit chain in a SQLite store")
        .arg(
            Arg::new("database")
                .short('d')
                .long("database")
                .value_name("URL")
                .help("SQLite database URL, e.g. sqlite://consent-gate.db")
                .required(true),
        )
        .arg(
            Arg::new("citizen")
                .short('c')
                .long("citizen")
                .value_name("CITIZEN_ID")
                .help("Citizen whose audit chain to verify")
                .required(true),
        )
        .arg(
            Arg::new("merkle-root")
                .short('m')
                .long("merkle-root")
                .value_name("HASH")
                .help("Expected Merkle root of the chain"),
        )
        .arg(
            Arg::new("entry")
                .short('e')
                .long("entry")
                .value_name("SEQUENCE")
                .value_parser(clap::value_parser!(u64))
                .help("Also prove this entry is included under the Merkle root"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .help("Enable verbose output"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppress output except errors"),
        )
        .get_matches();

    let database = matches
        .get_one::<String>("database")
        .ok_or_else(|| anyhow!("--database is required"))?;
    let citizen = matches
        .get_one::<String>("citizen")
        .ok_or_else(|| anyhow!("--citizen is required"))?;
    let expected_root = matches.get_one::<String>("merkle-root");
    let entry = matches.get_one::<u64>("entry").copied();
    let verbose = matches.get_flag("verbose");
    let quiet = matches.get_flag("quiet");

    let level = if quiet {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    if let Err(e) = verify_citizen_chain(database, citizen, expected_root, entry, verbose).await {
        error!("Audit chain verification failed: {}", e);
        std::process::exit(1);
    }

    if !quiet {
        println!("✓ Audit chain for {} verified", citizen);
    }
    Ok(())
}

async fn verify_citizen_chain(
    database: &str,
    citizen: &str,
    expected_root: Option<&String>,
    entry: Option<u64>,
    verbose: bool,
) -> Result<()> {
    info!("Verifying audit chain for {} in {}", citizen, database);

    let store = Arc::new(SqliteStore::new(database).await?);
    let trail = AuditTrail::new(store.clone());
    let entries = trail.entries(citizen).await?;
    let inclusion = match entry {
        Some(sequence) => Some(trail.inclusion_proof(citizen, sequence).await?),
        None => None,
    };
    store.close().await;

    if entries.is_empty() {
        return Err(anyhow!("No audit entries for citizen {}", citizen));
    }
    if verbose {
        println!("Loaded {} audit entries", entries.len());
    }

    match verify_chain(&entries) {
        ChainVerification::Intact { head_hash, .. } => {
            if verbose {
                println!("✓ Hash chain intact, head {}", head_hash);
            }
        }
        ChainVerification::Broken { at_sequence, reason } => {
            let tampered = find_tampered_entries(&entries);
            if !tampered.is_empty() {
                eprintln!("Entries whose contents no longer match their hashes: {:?}", tampered);
            }
            return Err(anyhow!("chain broken at sequence {}: {}", at_sequence, reason));
        }
    }

    let merkle_root = audit_merkle_root(&entries).ok_or_else(|| anyhow!("Empty audit chain"))?;
    if let Some(expected) = expected_root {
        if expected != &merkle_root {
            return Err(anyhow!(
                "Merkle root mismatch. Expected: {}, Got: {}",
                expected,
                merkle_root
            ));
        }
        if verbose {
            println!("✓ Merkle root matches expected value");
        }
    }

    if let Some(proof) = inclusion {
        if proof.root_hash != merkle_root || !proof.verify() {
            return Err(anyhow!("Inclusion proof for entry {} does not verify", proof.leaf_hash));
        }
        println!("✓ Entry {} included ({} proof steps)", proof.leaf_hash, proof.steps.len());
        if verbose {
            for (side, sibling) in &proof.steps {
                println!("  {:?}: {}", side, sibling);
            }
        }
    }

    if verbose {
        let mut by_type = BTreeMap::new();
        for entry in &entries {
            *by_type.entry(entry.entry_type.as_str()).or_insert(0usize) += 1;
        }

        println!("\nAudit Chain Summary:");
        println!("  Total entries: {}", entries.len());
        println!("  First entry: {}", entries[0].timestamp);
        println!("  Last entry: {}", entries[entries.len() - 1].timestamp);
        println!("  Merkle root: {}", merkle_root);
        println!("\nEntry type distribution:");
        for (entry_type, count) in by_type {
            println!("  {}: {}", entry_type, count);
        }
    } else {
        println!("Merkle root: {}", merkle_root);
    }

    Ok(())
}
