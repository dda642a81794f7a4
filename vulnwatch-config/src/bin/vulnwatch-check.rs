use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use vulnwatch_config::{ConfigLoad, ConfigLoader, ConfigSource, init_tracing};
use vulnwatch_core::scanner::ScannerSelection;

#[derive(Parser)]
#[command(
    name = "vulnwatch-check",
    about = "Validate vulnwatch operator configuration"
)]
struct Cli {
    /// Configuration file (TOML or JSON)
    #[arg(long, env = "VULNWATCH_CONFIG_PATH")]
    config: Option<PathBuf>,
    /// Env file loaded before reading OPERATOR_* variables
    #[arg(long)]
    env_file: Option<PathBuf>,
    /// Print the effective configuration as TOML
    #[arg(long)]
    print_effective: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(Some("warn"));

    let (mut loader, env_file_loaded) = ConfigLoader::from_env_file(cli.env_file.as_deref())
        .context("failed to read env file")?;
    if env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = cli.config {
        loader = loader.with_config_path(path);
    }

    let ConfigLoad {
        config,
        source,
        selection,
        overrides,
        warnings,
    } = loader.load().context("invalid operator configuration")?;

    let build = &config.operator.build;
    println!(
        "Operator: {} (commit {}, built {})",
        build.version, build.commit, build.date
    );
    match &source {
        ConfigSource::Default => println!("Source: built-in defaults"),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            println!("Source: {}", path.display())
        }
        ConfigSource::EnvInline => println!("Source: $VULNWATCH_CONFIG_JSON"),
    }
    if !overrides.is_empty() {
        println!("Overrides: {}", overrides.join(", "));
    }

    match selection {
        ScannerSelection::Trivy => println!(
            "Scanner: Trivy {} (job based, image {})",
            config.scanner_trivy.version,
            config.scanner_trivy.image_ref()
        ),
        ScannerSelection::AquaCsp => println!(
            "Scanner: Aqua CSP {} (api based, {})",
            config.scanner_aqua_csp.version, config.scanner_aqua_csp.base_url
        ),
    }

    if !warnings.is_empty() {
        println!("Warnings:");
        for warning in &warnings.items {
            match &warning.hint {
                Some(hint) => println!("  - {} (hint: {})", warning.message, hint),
                None => println!("  - {}", warning.message),
            }
        }
    }

    if cli.print_effective {
        let mut redacted = config.clone();
        if redacted.scanner_aqua_csp.password.is_some() {
            redacted.scanner_aqua_csp.password = Some("<redacted>".into());
        }
        let rendered =
            toml::to_string_pretty(&redacted).context("failed to render configuration")?;
        println!("\n{rendered}");
    }

    Ok(())
}
