//! Vendorkey CLI - Offline tools for vendor key records
//!
//! Reads and maintains the file-backed vendor record without contacting the
//! backend or the key nodes.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vendorkey_core::{
    ActivationPackage, PublicPoint, RotatingKey, Secp256k1Primitives, SettingsDraft,
    SigningPrimitives, VendorKeyConfig, VendorSettings,
};
use vendorkey_orchestrator::{ConfigStore, FileConfigStore, LicenseState, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "vendorkey")]
#[command(about = "Inspect and maintain vendor key records", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to $VENDORKEY_CONFIG or the XDG config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Vendor record file, overriding the configured one
    #[arg(short, long, global = true)]
    record: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show license state and key material
    Status {
        /// Print the license summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check an activation package against the outstanding candidate
    ValidatePackage {
        /// Activation package JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Print the settings draft that would be signed
    Draft {
        /// Allow self-registration in the realm
        #[arg(long)]
        registration_allowed: bool,

        /// Login page image URL
        #[arg(long)]
        image_url: Option<String>,

        /// Login page logo URL
        #[arg(long)]
        logo_url: Option<String>,

        /// Rotating key (hex); defaults to the active key
        #[arg(long)]
        key: Option<String>,
    },

    /// Drop the outstanding candidate key
    Abandon,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vendorkey=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config)?;
    let store = FileConfigStore::new(cli.record.unwrap_or_else(|| config.record_path.clone()));
    debug!("Using record {}", store.path().display());

    match cli.command {
        Commands::Status { json } => status(&store, json).await,
        Commands::ValidatePackage { file } => validate_package(&store, file).await,
        Commands::Draft {
            registration_allowed,
            image_url,
            logo_url,
            key,
        } => {
            let settings = VendorSettings::new(registration_allowed, image_url, logo_url);
            draft(&store, &config, settings, key).await
        }
        Commands::Abandon => abandon(&store).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<OrchestratorConfig> {
    let path = path
        .or_else(|| std::env::var_os("VENDORKEY_CONFIG").map(PathBuf::from))
        .unwrap_or_else(OrchestratorConfig::default_path);

    if path.exists() {
        OrchestratorConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))
    } else {
        debug!("No config at {}, using defaults", path.display());
        Ok(OrchestratorConfig::default())
    }
}

async fn status(store: &FileConfigStore, json: bool) -> Result<()> {
    let config = store.load().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&config.active_summary())?);
        return Ok(());
    }

    println!("License: {}", LicenseState::derive(&config));
    println!(
        "  Verifying key: {}",
        config.vvk_id.as_ref().map(|id| id.as_str()).unwrap_or("-")
    );
    println!("  Client id: {}", config.client_id.as_deref().unwrap_or("-"));
    println!("  Home key node: {}", config.home_ork_url().unwrap_or("-"));

    if let Some(active) = config.key_state.active() {
        println!("\nActive key:");
        println!("  Rotating key: {}", active.rotating_key);
        println!("  Vendor id: {}", active.vendor_id);
    }
    if let Some(candidate) = config.key_state.candidate() {
        println!("\nCandidate key:");
        println!("  Rotating key: {}", candidate.rotating_key);
        println!("  Vendor id: {}", candidate.vendor_id);
    }
    if let Some(max) = &config.max_user_acc {
        println!("\nMax user accounts: {}", max);
    }
    Ok(())
}

async fn validate_package(store: &FileConfigStore, file: PathBuf) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let pkg = ActivationPackage::parse(&content)?;

    let config = store.load().await?;
    let candidate = config.key_state.candidate();
    let validated = vendorkey_core::validate_activation_package(
        &pkg,
        candidate.map(|c| &c.rotating_key),
        candidate.map(|c| &c.vendor_id),
    )?;

    println!("✓ Activation package is valid");
    println!("  License id: {}", validated.license_id);
    println!("  Rotating key: {}", validated.rotating_key);
    println!("  Max user accounts: {}", validated.max_user_acc);
    Ok(())
}

async fn draft(
    store: &FileConfigStore,
    config: &OrchestratorConfig,
    settings: VendorSettings,
    key: Option<String>,
) -> Result<()> {
    let key = match key {
        Some(hex) => RotatingKey::from_hex(hex),
        None => active_key(&store.load().await?)?,
    };
    let point: PublicPoint = Secp256k1Primitives::new().decompress_point(&key.to_bytes()?)?;

    let draft = SettingsDraft::build(&settings, &config.settings_urls(), &point);
    println!("{}", draft.as_str());
    Ok(())
}

fn active_key(config: &VendorKeyConfig) -> Result<RotatingKey> {
    match config.key_state.active() {
        Some(active) => Ok(active.rotating_key.clone()),
        None => bail!("No active rotating key; pass --key"),
    }
}

async fn abandon(store: &FileConfigStore) -> Result<()> {
    let mut config = store.load().await?;
    let Some(candidate) = config.key_state.candidate().cloned() else {
        println!("No candidate key to abandon");
        return Ok(());
    };

    config.key_state = std::mem::take(&mut config.key_state).without_candidate();
    store.save(&config).await?;

    info!("Abandoned candidate {}", candidate.rotating_key.short());
    println!("✓ Candidate key {} abandoned", candidate.rotating_key);
    Ok(())
}
