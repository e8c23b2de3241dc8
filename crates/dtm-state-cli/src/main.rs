//! dtm-state CLI: `dtm-state` command.
//!
//! Operator tooling for the encrypted state store: save and inspect
//! documents, manage certificates, and run housekeeping. The CLI always
//! runs in persistent key mode, so the store survives between invocations.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};

use dtm_state::storage::Layout;
use dtm_state::{metadata_from_pairs, KeyMode, LogProgress, Metadata, SecureState, StoreConfig};

/// Environment variable holding the operator passphrase.
const PASSPHRASE_ENV: &str = "DTM_PASSPHRASE";

// ── CLI structure ─────────────────────────────────────────────────────────────

/// dtm-state CLI: encrypted, tamper-evident tunnel state.
#[derive(Parser, Debug)]
#[command(
    name = "dtm-state",
    about = "dtm-state CLI",
    version,
    long_about = "dtm-state: encrypted state store CLI\n\nSave and load encrypted documents, manage double-encrypted certificates,\nand inspect backups and key custody."
)]
struct Cli {
    /// Store root (default: $DTM_STATE_DIR or ~/.dtm)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the store and its key file
    Init,

    /// Save a JSON document
    Save {
        /// Document name
        name: String,

        /// Inline JSON text
        #[arg(long, conflicts_with = "file")]
        json: Option<String>,

        /// Read JSON from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Print a document as JSON
    Load {
        /// Document name
        name: String,
    },

    /// List stored documents
    List,

    /// Delete a document (backups are kept)
    Delete {
        /// Document name
        name: String,
    },

    /// Certificate management
    Cert {
        #[command(subcommand)]
        subcommand: CertCommands,
    },

    /// Sweep orphans, prune backups and destroy in-memory keys
    Cleanup,

    /// Show store and key custody status
    Status,
}

#[derive(Subcommand, Debug)]
enum CertCommands {
    /// Store a certificate from a file
    Store {
        /// Certificate id
        id: String,

        /// Certificate file
        file: PathBuf,

        /// Metadata entry as key=value (repeatable)
        #[arg(long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },

    /// Decrypt a certificate
    Load {
        /// Certificate id
        id: String,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Replace a certificate, keeping the previous one as a backup
    Rotate {
        /// Certificate id
        id: String,

        /// New certificate file
        file: PathBuf,
    },

    /// List stored certificates
    List,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let verbose = cli.verbose;

    let result = match open_state(&cli).await {
        Ok(state) => run(&state, cli.command, verbose).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(state: &SecureState, command: Commands, verbose: bool) -> Result<()> {
    match command {
        Commands::Init => cmd_init(state),
        Commands::Save { name, json, file } => {
            cmd_save(state, &name, json.as_deref(), file.as_deref(), verbose).await
        }
        Commands::Load { name } => cmd_load(state, &name).await,
        Commands::List => cmd_list(state, verbose).await,
        Commands::Delete { name } => cmd_delete(state, &name).await,
        Commands::Cert { subcommand } => match subcommand {
            CertCommands::Store { id, file, meta } => cmd_cert_store(state, &id, &file, &meta).await,
            CertCommands::Load { id, out } => cmd_cert_load(state, &id, out.as_deref(), verbose).await,
            CertCommands::Rotate { id, file } => cmd_cert_rotate(state, &id, &file).await,
            CertCommands::List => cmd_cert_list(state, verbose).await,
        },
        Commands::Cleanup => cmd_cleanup(state).await,
        Commands::Status => cmd_status(state).await,
    }
}

// ── Setup helpers ─────────────────────────────────────────────────────────────

fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let config = match &cli.config {
        Some(path) => StoreConfig::from_file(path)
            .with_context(|| format!("failed to read config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    let mut config = config.apply_env();
    if let Some(root) = &cli.root {
        config.root_dir = root.clone();
    }
    config.key_mode = KeyMode::Persistent;
    Ok(config)
}

fn prompt_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}");
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read passphrase")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Operator passphrase from `DTM_PASSPHRASE` or stdin. A store without a key
/// file yet gets a confirmation prompt, since the passphrase it sets cannot
/// be recovered.
fn read_passphrase(creating: bool) -> Result<String> {
    if let Ok(passphrase) = std::env::var(PASSPHRASE_ENV) {
        if passphrase.is_empty() {
            bail!("passphrase cannot be empty ({PASSPHRASE_ENV} is set but empty)");
        }
        return Ok(passphrase);
    }

    let prompt = if creating {
        "New operator passphrase: "
    } else {
        "Operator passphrase: "
    };
    let passphrase = prompt_line(prompt)?;
    if passphrase.is_empty() {
        bail!("passphrase cannot be empty");
    }
    if creating && prompt_line("Confirm passphrase: ")? != passphrase {
        bail!("passphrases do not match");
    }
    Ok(passphrase)
}

async fn open_state(cli: &Cli) -> Result<SecureState> {
    let config = load_config(cli)?;
    let creating = !Layout::new(&config.root_dir).key_file_path().exists();
    let passphrase = read_passphrase(creating)?;
    let mut builder = SecureState::builder(config).passphrase(passphrase);
    if cli.verbose {
        builder = builder.progress(Arc::new(LogProgress::default()));
    }
    builder
        .initialize()
        .await
        .context("failed to open secure state")
}

fn parse_meta(pairs: &[String]) -> Result<Metadata> {
    let split = pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| anyhow!("metadata must be KEY=VALUE, got {pair:?}"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(metadata_from_pairs(split))
}

// ── Command implementations ───────────────────────────────────────────────────

/// `dtm-state init`
fn cmd_init(state: &SecureState) -> Result<()> {
    println!("Secure state ready at {}", state.root().display());
    println!("  Public key: {}", state.public_fingerprint());
    println!("  Memory:     {}", state.pin_status());
    Ok(())
}

/// `dtm-state save <name> (--json TEXT | --file PATH)`
async fn cmd_save(
    state: &SecureState,
    name: &str,
    json: Option<&str>,
    file: Option<&Path>,
    verbose: bool,
) -> Result<()> {
    let text = match (json, file) {
        (Some(text), _) => text.to_string(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        (None, None) => bail!("one of --json or --file is required"),
    };
    let document: serde_json::Value = serde_json::from_str(&text).context("invalid JSON")?;

    state.save(name, &document).await?;
    println!("Saved {name}");
    if verbose {
        println!("  Backups: {}", state.backups(name).await?.len());
    }
    Ok(())
}

/// `dtm-state load <name>`
async fn cmd_load(state: &SecureState, name: &str) -> Result<()> {
    let document: serde_json::Value = state
        .load(name)
        .await?
        .ok_or_else(|| anyhow!("document not found: {name}"))?;
    println!("{}", serde_json::to_string_pretty(&document)?);
    Ok(())
}

/// `dtm-state list`
async fn cmd_list(state: &SecureState, verbose: bool) -> Result<()> {
    let names = state.list_documents().await?;
    if names.is_empty() {
        println!("No documents stored.");
        return Ok(());
    }
    for name in names {
        if verbose {
            let backups = state.backups(&name).await?.len();
            println!("{name}  ({backups} backups)");
        } else {
            println!("{name}");
        }
    }
    Ok(())
}

/// `dtm-state delete <name>`
async fn cmd_delete(state: &SecureState, name: &str) -> Result<()> {
    if state.delete(name).await? {
        println!("Deleted {name} (backups kept)");
    } else {
        println!("No document named {name}");
    }
    Ok(())
}

/// `dtm-state cert store <id> <file> [--meta KEY=VALUE]...`
async fn cmd_cert_store(state: &SecureState, id: &str, file: &Path, meta: &[String]) -> Result<()> {
    let cert = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    state.store_certificate(id, &cert, parse_meta(meta)?).await?;
    println!("Stored certificate {id} ({} bytes)", cert.len());
    Ok(())
}

/// `dtm-state cert load <id> [--out PATH]`
async fn cmd_cert_load(state: &SecureState, id: &str, out: Option<&Path>, verbose: bool) -> Result<()> {
    let (cert, metadata) = state.load_certificate(id).await?;
    match out {
        Some(path) => {
            std::fs::write(path, &cert)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Wrote certificate {id} to {}", path.display());
        }
        None => std::io::stdout().write_all(&cert)?,
    }
    if verbose {
        eprintln!("{}", serde_json::to_string_pretty(&metadata)?);
    }
    Ok(())
}

/// `dtm-state cert rotate <id> <file>`
async fn cmd_cert_rotate(state: &SecureState, id: &str, file: &Path) -> Result<()> {
    let cert = std::fs::read(file).with_context(|| format!("failed to read {}", file.display()))?;
    state.rotate_certificate(id, &cert).await?;
    println!("Rotated certificate {id}");
    Ok(())
}

/// `dtm-state cert list`
async fn cmd_cert_list(state: &SecureState, verbose: bool) -> Result<()> {
    let ids = state.list_certificates().await;
    if ids.is_empty() {
        println!("No certificates stored.");
        return Ok(());
    }
    for id in ids {
        match state.certificate_record(&id).await {
            Some(record) if verbose => println!("{id}  sha256:{}", record.hash),
            _ => println!("{id}"),
        }
    }
    Ok(())
}

/// `dtm-state cleanup`
async fn cmd_cleanup(state: &SecureState) -> Result<()> {
    let report = state.cleanup().await;
    println!("Cleanup complete");
    println!("  Temp files removed:    {}", report.sweep.temp_files);
    println!("  Stray backups removed: {}", report.sweep.stray_backups);
    println!("  Backups pruned:        {}", report.pruned_backups);
    Ok(())
}

/// `dtm-state status`
async fn cmd_status(state: &SecureState) -> Result<()> {
    let documents = state.list_documents().await?;
    let certificates = state.list_certificates().await;
    println!("Root:         {}", state.root().display());
    println!("Key mode:     {:?}", state.key_mode());
    println!("Public key:   {}", state.public_fingerprint());
    println!("Memory:       {}", state.pin_status());
    println!("Documents:    {}", documents.len());
    println!("Certificates: {}", certificates.len());
    Ok(())
}
