use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formvault_core::export::{seal_with_password, ExportRevision};
use formvault_core::import::{apply_import, validate_import};
use formvault_core::{
    AutosaveConfig, CryptoError, ExportDocument, FormStore, Formpack, ImportMode, StoreError,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// FormVault CLI - inspect and maintain the local encrypted form store
#[derive(Parser)]
#[command(name = "formvault")]
#[command(about = "Diagnostic and maintenance tool for the offline form store", long_about = None)]
struct Cli {
    /// Data directory (defaults to the platform location)
    #[arg(long, global = true)]
    dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which local resources are present
    Status,

    /// List the drafts of a formpack
    List {
        /// Formpack id
        formpack_id: String,
    },

    /// Print one draft as JSON
    Show {
        /// Record id
        id: String,
    },

    /// Export a draft to a JSON file
    Export {
        /// Record id
        id: String,

        /// Formpack manifest JSON file
        #[arg(long)]
        manifest: PathBuf,

        /// Output file (defaults to the standard export filename)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Attach the draft's snapshots as named revisions
        #[arg(long)]
        with_snapshots: bool,

        /// Password-protect the export
        #[arg(long)]
        encrypt: bool,
    },

    /// Validate an export file and import it
    Import {
        /// Export file to import
        file: PathBuf,

        /// Formpack manifest JSON file
        #[arg(long)]
        manifest: PathBuf,

        /// Overwrite the active draft instead of creating a new one
        #[arg(long)]
        overwrite: bool,

        /// Confirm overwriting without prompting
        #[arg(long)]
        yes: bool,

        /// The file is password protected
        #[arg(long)]
        encrypted: bool,
    },

    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommands,
    },

    /// Delete all local data, including the storage key
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum SnapshotCommands {
    /// List a record's snapshots
    List { record_id: String },

    /// Capture the record's current data
    Create {
        record_id: String,

        #[arg(long)]
        label: Option<String>,
    },

    /// Copy a snapshot's data back into its record
    Restore { snapshot_id: String },

    /// Delete all snapshots of a record
    Clear { record_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::WARN)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    let cli = Cli::parse();
    let dir = cli
        .dir
        .unwrap_or_else(formvault_core::platform::get_data_dir);

    match cli.command {
        Commands::Status => status(&dir),
        Commands::List { formpack_id } => list(&dir, &formpack_id).await,
        Commands::Show { id } => show(&dir, &id).await,
        Commands::Export {
            id,
            manifest,
            out,
            with_snapshots,
            encrypt,
        } => export(&dir, &id, &manifest, out, with_snapshots, encrypt).await,
        Commands::Import {
            file,
            manifest,
            overwrite,
            yes,
            encrypted,
        } => import(&dir, &file, &manifest, overwrite, yes, encrypted).await,
        Commands::Snapshot { command } => snapshot(&dir, command).await,
        Commands::Reset { yes } => reset(&dir, yes),
    }
}

fn open_store(dir: &Path) -> Result<FormStore> {
    match FormStore::open_in_dir(dir) {
        Ok(store) => Ok(store),
        Err(StoreError::Crypto(CryptoError::KeyMissing)) => {
            bail!(
                "the storage key is missing; the local data cannot be decrypted.\n\
                 Run `formvault reset --yes` to delete all local data and start over."
            )
        }
        Err(e) => Err(e).context("failed to open the store"),
    }
}

fn load_manifest(path: &Path) -> Result<Formpack> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read manifest {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("manifest {} is not a valid formpack", path.display()))
}

fn status(dir: &Path) -> Result<()> {
    let status = FormStore::status_of_dir(dir);
    println!("Data directory: {}", dir.display());
    println!("  database: {}", present(status.database_present));
    println!("  storage key: {}", present(status.key_present));
    if status.needs_reset() {
        println!();
        println!("The database exists but its key is gone; the data is");
        println!("unrecoverable. Run `formvault reset --yes` to start over.");
    }
    Ok(())
}

fn present(yes: bool) -> &'static str {
    if yes {
        "present"
    } else {
        "missing"
    }
}

async fn list(dir: &Path, formpack_id: &str) -> Result<()> {
    let store = open_store(dir)?;
    let records = store.records().list(formpack_id).await?;
    let active = store.active().peek(formpack_id)?;

    if records.is_empty() {
        println!("No drafts for formpack {}", formpack_id);
        return Ok(());
    }
    for record in records {
        let marker = if active.as_deref() == Some(record.id.as_str()) {
            "*"
        } else {
            " "
        };
        let snapshots = store.snapshots().count_by_record(&record.id).await?;
        println!(
            "{} {}  {}  {}  [{} snapshot(s)]",
            marker,
            record.id,
            record.updated_at.format("%Y-%m-%d %H:%M"),
            record.title.as_deref().unwrap_or("(untitled)"),
            snapshots,
        );
    }
    Ok(())
}

async fn show(dir: &Path, id: &str) -> Result<()> {
    let store = open_store(dir)?;
    let Some(record) = store.records().get(id).await? else {
        bail!("no record with id {}", id);
    };
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

async fn export(
    dir: &Path,
    id: &str,
    manifest: &Path,
    out: Option<PathBuf>,
    with_snapshots: bool,
    encrypt: bool,
) -> Result<()> {
    let store = open_store(dir)?;
    let formpack = load_manifest(manifest)?;
    let Some(record) = store.records().get(id).await? else {
        bail!("no record with id {}", id);
    };
    if record.formpack_id != formpack.id {
        bail!(
            "record {} belongs to formpack {}, not {}",
            id,
            record.formpack_id,
            formpack.id
        );
    }

    let revisions = if with_snapshots {
        let snapshots = store.snapshots().list_by_record(id).await?;
        let revisions: Vec<ExportRevision> = snapshots
            .into_iter()
            .map(|s| {
                let label = s
                    .label
                    .unwrap_or_else(|| s.created_at.format("%Y-%m-%d %H:%M").to_string());
                ExportRevision {
                    label,
                    data: s.data,
                }
            })
            .collect();
        (!revisions.is_empty()).then_some(revisions)
    } else {
        None
    };

    let document = ExportDocument::new(&formpack, &record, revisions);
    let out = out.unwrap_or_else(|| PathBuf::from(document.filename()));

    let text = if encrypt {
        let password = rpassword::prompt_password("Export password: ")?;
        let confirm = rpassword::prompt_password("Confirm password: ")?;
        if password != confirm {
            bail!("passwords do not match");
        }
        let envelope = seal_with_password(&document, &password)
            .map_err(StoreError::from)
            .context("failed to encrypt the export")?;
        serde_json::to_string_pretty(&envelope)?
    } else {
        document.to_json()?
    };

    std::fs::write(&out, text).with_context(|| format!("failed to write {}", out.display()))?;
    println!("Exported to {}", out.display());
    Ok(())
}

async fn import(
    dir: &Path,
    file: &Path,
    manifest: &Path,
    overwrite: bool,
    yes: bool,
    encrypted: bool,
) -> Result<()> {
    let store = open_store(dir)?;
    let formpack = load_manifest(manifest)?;
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;

    let password = if encrypted {
        Some(rpassword::prompt_password("Import password: ")?)
    } else {
        None
    };
    let validated = validate_import(&raw, &formpack, password.as_deref())?;

    let mode = if overwrite {
        let confirmed = yes || confirm("Overwrite the active draft with this file?")?;
        ImportMode::Overwrite { confirmed }
    } else {
        ImportMode::New
    };

    let autosave = store.autosave(AutosaveConfig::default());
    let outcome = apply_import(
        validated,
        mode,
        &store.records(),
        &store.active(),
        &autosave,
    )
    .await?;

    if outcome.created {
        println!("Imported as new draft {}", outcome.record.id);
    } else {
        println!("Overwrote draft {}", outcome.record.id);
    }
    Ok(())
}

async fn snapshot(dir: &Path, command: SnapshotCommands) -> Result<()> {
    let store = open_store(dir)?;
    match command {
        SnapshotCommands::List { record_id } => {
            let snapshots = store.snapshots().list_by_record(&record_id).await?;
            if snapshots.is_empty() {
                println!("No snapshots for record {}", record_id);
            }
            for snapshot in snapshots {
                println!(
                    "{}  {}  {}",
                    snapshot.id,
                    snapshot.created_at.format("%Y-%m-%d %H:%M"),
                    snapshot.label.as_deref().unwrap_or("(unlabeled)"),
                );
            }
        }
        SnapshotCommands::Create { record_id, label } => {
            let snapshot = store.snapshots().create(&record_id, label).await?;
            println!("Created snapshot {}", snapshot.id);
        }
        SnapshotCommands::Restore { snapshot_id } => {
            let autosave = store.autosave(AutosaveConfig::default());
            let Some(record) = store.restore_snapshot(&autosave, &snapshot_id).await? else {
                bail!("no snapshot with id {}", snapshot_id);
            };
            println!("Restored snapshot into record {}", record.id);
        }
        SnapshotCommands::Clear { record_id } => {
            let deleted = store.snapshots().clear_by_record(&record_id).await?;
            println!("Deleted {} snapshot(s)", deleted);
        }
    }
    Ok(())
}

fn reset(dir: &Path, yes: bool) -> Result<()> {
    if !yes && !confirm("Delete ALL local data, including the storage key?")? {
        println!("Aborted");
        return Ok(());
    }
    FormStore::reset_dir(dir)?;
    println!("All local data removed from {}", dir.display());
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
