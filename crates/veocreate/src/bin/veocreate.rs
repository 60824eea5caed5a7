use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use veocreate::batch::{BatchOptions, SignerLoader};
use veocreate::config::FileConfig;
use veocreate::digest::HashAlgorithm;
use veocreate::error::VeoError;
use veocreate::signer::Signer;

#[derive(Parser, Debug)]
#[command(name = "veocreate", version, about = "Builds and signs VERS V3 Electronic Objects")]
struct Cli {
    /// Template directory (readme + metadata-package templates)
    #[arg(short = 't', long = "templates", value_name = "DIR")]
    template_dir: Option<PathBuf>,

    /// Tab-separated control script
    #[arg(short = 'c', long = "control", value_name = "FILE")]
    control_script: PathBuf,

    /// PFX signer, repeatable: each occurrence takes a path and a password
    #[arg(short = 's', long = "signer", value_names = ["PFX", "PASSWORD"], num_args = 2)]
    signer: Vec<String>,

    /// Output directory for finished .veo.zip archives
    #[arg(short = 'o', long = "output", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Hash algorithm: SHA-1, SHA-256, SHA-384, or SHA-512
    #[arg(long = "ha", value_name = "ALGO")]
    hash_algorithm: Option<String>,

    /// Control-script character encoding (default windows-1252)
    #[arg(short = 'e', long = "encoding", value_name = "ENCODING")]
    encoding: Option<String>,

    /// Optional veocreate.toml config file
    #[arg(long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Chatty: info-level logging
    #[arg(short = 'v')]
    verbose: bool,

    /// Verbose: debug-level logging
    #[arg(long = "vv")]
    very_verbose: bool,

    /// Retain staging directories instead of deleting them
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

/// The CLI's `SignerLoader`: PKCS#12 decoding is an external collaborator
/// (spec §1), so this stub reports the gap explicitly rather than silently
/// producing an unusable signer.
struct Pkcs12Stub;

impl SignerLoader for Pkcs12Stub {
    fn load(&self, pfx_path: &Path, _password: &str) -> Result<Signer, VeoError> {
        Err(VeoError::fatal(
            9001,
            "cli",
            "load_signer",
            format!(
                "PFX signer loading is not implemented in this binary; supply a Signer via the library API instead (requested: {})",
                pfx_path.display()
            ),
        ))
    }
}

fn init_tracing(verbose: bool, very_verbose: bool) {
    let default_level = if very_verbose {
        "debug"
    } else if verbose {
        "info"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(false).compact();
    let _ = tracing_subscriber::registry().with(filter).with(fmt_layer).try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.very_verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let script_dir = cli
        .control_script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    let config_path = cli.config.clone().unwrap_or_else(|| script_dir.join("veocreate.toml"));
    let file_config = FileConfig::load(&config_path).context("loading configuration")?;

    let template_dir = cli
        .template_dir
        .or(file_config.template_dir.clone())
        .unwrap_or_else(|| script_dir.clone());
    let output_dir = cli
        .output_dir
        .or(file_config.output_dir.clone())
        .unwrap_or_else(|| PathBuf::from("."));

    let hash = match cli.hash_algorithm.as_deref() {
        Some(raw) => HashAlgorithm::parse(raw)?,
        None => file_config
            .resolved_hash()?
            .unwrap_or(HashAlgorithm::Sha256),
    };

    let encoding_label = cli.encoding.as_deref().or(file_config.encoding.as_deref());
    let encoding = match encoding_label {
        Some(label) => encoding_rs::Encoding::for_label(label.as_bytes())
            .with_context(|| format!("unknown control-script encoding `{label}`"))?,
        None => encoding_rs::WINDOWS_1252,
    };

    if !cli.signer.is_empty() {
        tracing::warn!(
            count = cli.signer.len() / 2,
            "PFX signer flags were supplied but PKCS#12 loading is not implemented in this binary"
        );
    }

    let mut opts = BatchOptions::new(cli.control_script, template_dir, output_dir);
    opts.default_hash = hash;
    opts.encoding = encoding;
    opts.debug = cli.debug;

    let report = veocreate::batch::run_batch(&opts, &Pkcs12Stub)?;
    tracing::info!(built = report.veos_built, abandoned = report.veos_abandoned, "batch complete");
    println!(
        "{} VEO(s) built, {} abandoned",
        report.veos_built, report.veos_abandoned
    );
    Ok(())
}
