//! Drover daemon entry point.

mod args;
mod daemon;

use std::path::Path;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Cli, Commands, ConfigAction};
use drover_core::config::{
    DroverConfig, LogFormat, LoggingConfig, StoreBackend, default_config_path, load_config,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => {
            let config = prepare(cli.config.as_deref(), cli.store.as_deref(), cli.verbose)?;
            daemon::run(config).await?;
        }
        Some(Commands::Distill) => {
            let config = prepare(cli.config.as_deref(), cli.store.as_deref(), cli.verbose)?;
            daemon::distill_once(config).await?;
        }
        Some(Commands::Recover) => {
            let config = prepare(cli.config.as_deref(), cli.store.as_deref(), cli.verbose)?;
            daemon::recover_once(config).await?;
        }
        Some(Commands::Config { action }) => {
            handle_config(cli.config.as_deref(), cli.store.as_deref(), action)?
        }
    }

    Ok(())
}

/// Load the config file and fold in command-line overrides. The `--store`
/// flag outranks both the file and the `DROVER_STORE_URL` environment
/// override applied during loading.
fn load_effective(path: Option<&Path>, store_url: Option<&str>) -> anyhow::Result<DroverConfig> {
    let mut config = load_config(path)?;
    if let Some(url) = store_url {
        config.store.backend = StoreBackend::Http;
        config.store.base_url = Some(url.to_string());
    }
    Ok(config)
}

/// Load, validate, and wire logging for the daemon-style commands.
fn prepare(
    path: Option<&Path>,
    store_url: Option<&str>,
    verbose: bool,
) -> anyhow::Result<DroverConfig> {
    let config = load_effective(path, store_url)?;
    config.validate()?;
    init_tracing(&config.logging, verbose);
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let default_directive = if verbose {
        "debug"
    } else {
        logging.level.as_str()
    };
    // RUST_LOG wins over the config file when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(logging.show_target);

    match logging.format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn handle_config(
    path: Option<&Path>,
    store_url: Option<&str>,
    action: ConfigAction,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_effective(path, store_url)?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Validate => {
            let config = load_effective(path, store_url)?;
            config.validate()?;
            println!("configuration is valid");
        }
        ConfigAction::Init { force } => {
            let target = path
                .map(Path::to_path_buf)
                .unwrap_or_else(default_config_path);
            init_config(&target, force)?;
            println!("wrote {}", target.display());
        }
    }
    Ok(())
}

/// Write a default configuration file, refusing to clobber an existing one
/// unless `force` is set.
fn init_config(target: &Path, force: bool) -> anyhow::Result<()> {
    if target.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            target.display()
        );
    }
    if let Some(parent) = target.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let rendered = toml::to_string_pretty(&DroverConfig::default())?;
    std::fs::write(target, rendered)?;
    Ok(())
}
