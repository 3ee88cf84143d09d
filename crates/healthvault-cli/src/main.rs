//! HealthVault CLI — `hvault` command.
//!
//! Operator surface over a vault directory: register users, store and read
//! encrypted records, query partitions, and inspect the audit trail.

use std::io::{Read, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use healthvault::auth::is_authorized;
use healthvault::storage::record::TIMESTAMP_KEY;
use healthvault::time::{micros_to_datetime, micros_to_rfc3339, now_micros, rfc3339_to_micros};
use healthvault::{Metadata, QueryFilter, StorageKey, Vault, VaultConfig};

const PASSWORD_ENV: &str = "HEALTHVAULT_PASSWORD";
const HOME_ENV: &str = "HEALTHVAULT_HOME";

// ── Helpers ───────────────────────────────────────────────────────────────────

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    if let Some(home) = std::env::var_os(HOME_ENV) {
        return Ok(PathBuf::from(home));
    }
    let home = std::env::var_os("HOME").ok_or_else(|| anyhow!("HOME not set; pass --root"))?;
    Ok(PathBuf::from(home).join(".healthvault"))
}

/// Password from `HEALTHVAULT_PASSWORD`, else the first line of stdin.
fn read_password(prompt: &str) -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    eprint!("{prompt}");
    let mut password = String::new();
    std::io::stdin()
        .read_line(&mut password)
        .context("failed to read password")?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("password cannot be empty");
    }
    Ok(password)
}

fn open_vault(root: PathBuf) -> Result<Vault> {
    let config = VaultConfig::load(&root)
        .with_context(|| format!("failed to load config from {}", root.display()))?;
    Vault::open(config).with_context(|| format!("failed to open vault at {}", root.display()))
}

fn parse_pair(s: &str) -> Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .ok_or_else(|| anyhow!("expected key=value, got '{s}'"))?;
    if k.is_empty() {
        bail!("empty metadata key in '{s}'");
    }
    Ok((k.to_string(), v.to_string()))
}

fn parse_time(s: &str) -> Result<u64> {
    rfc3339_to_micros(s).ok_or_else(|| anyhow!("invalid RFC 3339 timestamp: '{s}'"))
}

fn read_payload(data: Option<String>, file: Option<PathBuf>) -> Result<Vec<u8>> {
    match (data, file) {
        (Some(_), Some(_)) => bail!("pass either --data or --file, not both"),
        (Some(data), None) => Ok(data.into_bytes()),
        (None, Some(path)) => {
            std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
        }
        (None, None) => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("failed to read payload from stdin")?;
            Ok(buf)
        }
    }
}

// ── CLI structure ─────────────────────────────────────────────────────────────

/// HealthVault CLI — encrypted personal health record storage.
#[derive(Parser, Debug)]
#[command(
    name = "hvault",
    about = "HealthVault CLI",
    version,
    long_about = "hvault — HealthVault CLI\n\nStore, query and delete encrypted health records partitioned by\nowner and category, and inspect the hash-chained audit log.\n\nPasswords are read from HEALTHVAULT_PASSWORD or the first line of stdin."
)]
struct Cli {
    /// Vault root (default: $HEALTHVAULT_HOME, then ~/.healthvault)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the vault directory and write a default config
    Init,

    /// Register a new user
    Register {
        /// User identity (first segment of every key they own)
        #[arg(long)]
        user: String,
    },

    /// Encrypt and store a record
    Put {
        #[arg(long)]
        user: String,

        /// Category, e.g. "vitals" or "wellness/symptoms"
        #[arg(long)]
        category: String,

        /// Record identifier; generated when omitted
        #[arg(long)]
        id: Option<String>,

        /// Payload as a string (default: read stdin)
        #[arg(long)]
        data: Option<String>,

        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Plaintext metadata, repeatable: --meta entry_type=vital
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Decrypt and print a record
    Get {
        #[arg(long)]
        user: String,

        /// Full key: owner/category/identifier
        key: String,
    },

    /// List decrypted records in a partition
    Query {
        #[arg(long)]
        user: String,

        #[arg(long)]
        category: String,

        /// Only records at or after this RFC 3339 time
        #[arg(long)]
        since: Option<String>,

        /// Only records at or before this RFC 3339 time
        #[arg(long)]
        until: Option<String>,

        /// Exact metadata match, repeatable
        #[arg(long = "where", value_name = "KEY=VALUE")]
        filters: Vec<String>,

        /// Emit JSON lines instead of text
        #[arg(long)]
        json: bool,
    },

    /// Delete a record (requires the owner's password)
    Delete {
        #[arg(long)]
        user: String,

        key: String,
    },

    /// Show the audit trail
    Audit {
        /// Only entries for this identity
        #[arg(long)]
        user: Option<String>,

        /// Check the hash chain instead of printing entries
        #[arg(long)]
        verify: bool,
    },

    /// Rebuild the partition index from the record tree
    RebuildIndex,
}

// ── Main ──────────────────────────────────────────────────────────────────────

fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = resolve_root(cli.root).and_then(|root| match cli.command {
        Commands::Init => cmd_init(root, verbose),
        Commands::Register { user } => cmd_register(root, &user),
        Commands::Put {
            user,
            category,
            id,
            data,
            file,
            meta,
        } => cmd_put(root, &user, &category, id.as_deref(), data, file, &meta, verbose),
        Commands::Get { user, key } => cmd_get(root, &user, &key),
        Commands::Query {
            user,
            category,
            since,
            until,
            filters,
            json,
        } => cmd_query(
            root,
            &user,
            &category,
            since.as_deref(),
            until.as_deref(),
            &filters,
            json,
        ),
        Commands::Delete { user, key } => cmd_delete(root, &user, &key),
        Commands::Audit { user, verify } => cmd_audit(root, user.as_deref(), verify),
        Commands::RebuildIndex => cmd_rebuild_index(root),
    });

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_init(root: PathBuf, verbose: bool) -> Result<()> {
    let config = VaultConfig::load(&root).unwrap_or_else(|e| {
        log::warn!("ignoring unreadable config: {e}");
        VaultConfig::new(&root)
    });
    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create {}", root.display()))?;
    if !config.config_path().exists() {
        config.save().context("failed to write config")?;
    }
    let vault = Vault::open(config)?;

    println!("Initialized vault at {}", root.display());
    if verbose {
        let config = vault.config();
        println!("  Session TTL:   {}s", config.session_ttl_secs);
        println!("  Rate window:   {}s", config.rate_limit_window_secs);
        println!("  Max failures:  {}", config.max_failed_attempts);
        println!("  Audit log:     {}", config.audit_path().display());
    }
    Ok(())
}

fn cmd_register(root: PathBuf, user: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let password = read_password("Password for new user: ")?;
    vault
        .register(user, &password)
        .with_context(|| format!("failed to register '{user}'"))?;
    println!("Registered user '{user}'");
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_put(
    root: PathBuf,
    user: &str,
    category: &str,
    id: Option<&str>,
    data: Option<String>,
    file: Option<PathBuf>,
    meta: &[String],
    verbose: bool,
) -> Result<()> {
    let vault = open_vault(root)?;
    let password = read_password("Password: ")?;
    let payload = read_payload(data, file)?;

    let mut metadata = Metadata::new();
    for pair in meta {
        let (k, v) = parse_pair(pair)?;
        metadata.insert(k, v);
    }
    metadata
        .entry(TIMESTAMP_KEY.to_string())
        .or_insert_with(|| micros_to_rfc3339(now_micros()));

    let (_session, key) = vault.unlock(user, &password)?;
    let stored = match id {
        Some(id) => {
            let raw = StorageKey::new(user, category, id)?.to_string();
            vault.store().put(&raw, &payload, &metadata, key.as_slice())?
        }
        None => vault
            .store()
            .insert(user, category, &payload, &metadata, key.as_slice())?,
    };

    println!("{stored}");
    if verbose {
        eprintln!("  {} bytes, {} metadata fields", payload.len(), metadata.len());
    }
    Ok(())
}

fn cmd_get(root: PathBuf, user: &str, key: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let password = read_password("Password: ")?;
    let (_session, data_key) = vault.unlock(user, &password)?;
    if !is_authorized(user, key) {
        bail!("'{user}' may not read '{key}'");
    }
    let plaintext = vault
        .store()
        .get(key, data_key.as_slice())?
        .ok_or_else(|| anyhow!("no record at '{key}'"))?;
    std::io::stdout()
        .write_all(&plaintext)
        .context("failed to write record")?;
    Ok(())
}

fn cmd_query(
    root: PathBuf,
    user: &str,
    category: &str,
    since: Option<&str>,
    until: Option<&str>,
    filters: &[String],
    json: bool,
) -> Result<()> {
    let mut filter = QueryFilter::all();
    if let Some(since) = since {
        filter = filter.since(parse_time(since)?);
    }
    if let Some(until) = until {
        filter = filter.until(parse_time(until)?);
    }
    for pair in filters {
        let (k, v) = parse_pair(pair)?;
        filter = filter.with(k, v);
    }

    let vault = open_vault(root)?;
    let password = read_password("Password: ")?;
    let (_session, key) = vault.unlock(user, &password)?;
    let entries = vault
        .store()
        .query_entries(user, category, &filter, key.as_slice())?;

    if entries.is_empty() && !json {
        println!("No records in {user}/{category}.");
        return Ok(());
    }
    for entry in entries {
        let text = String::from_utf8_lossy(&entry.plaintext);
        if json {
            let line = serde_json::json!({
                "key": entry.key.to_string(),
                "metadata": entry.metadata,
                "data": text,
            });
            println!("{line}");
        } else {
            println!("{}", entry.key);
            for (k, v) in &entry.metadata {
                println!("  {k}: {v}");
            }
            println!("  data: {text}");
        }
    }
    Ok(())
}

fn cmd_delete(root: PathBuf, user: &str, key: &str) -> Result<()> {
    let vault = open_vault(root)?;
    let password = read_password("Password: ")?;
    let session = vault.login(user, &password)?;
    vault.delete_with_session(key, &session.token)?;
    vault.logout(&session.token);
    println!("Deleted {key}");
    Ok(())
}

fn cmd_audit(root: PathBuf, user: Option<&str>, verify: bool) -> Result<()> {
    let vault = open_vault(root)?;
    let audit = vault.audit();

    if verify {
        let count = audit.verify_chain()?;
        println!("Audit chain intact: {count} entries");
        return Ok(());
    }

    let entries = match user {
        Some(user) => audit.entries_for(user)?,
        None => audit.entries()?,
    };
    for entry in entries {
        let ts = micros_to_datetime(entry.timestamp).format("%Y-%m-%d %H:%M:%S UTC");
        let status = if entry.success { "ok" } else { "FAILED" };
        println!("{ts}  {:<12} {:<6} {}", entry.owner_id, status, entry.operation);
    }
    Ok(())
}

fn cmd_rebuild_index(root: PathBuf) -> Result<()> {
    let vault = open_vault(root)?;
    let count = vault.store().rebuild_index()?;
    println!("Indexed {count} records");
    Ok(())
}
