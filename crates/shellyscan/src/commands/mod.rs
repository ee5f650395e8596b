//! Command handlers: bridge CLI args to the discovery engine and format
//! the results.

pub mod config_cmd;
pub mod devices;
pub mod scan;
pub mod watch;

use std::io::IsTerminal;
use std::sync::Arc;

use shellyscan_config::{Config, ScanModeSetting, config_path, load_config_from};
use shellyscan_core::{CredentialProvider, Engine, NoCredentials};
use tracing::debug;

use crate::cli::{DiscoveryOpts, GlobalOpts, ModeArg};
use crate::error::CliError;
use crate::prompt::TerminalCredentials;

/// Load the file named by `--config` (or the default one) plus environment.
pub fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);
    debug!(path = %path.display(), "loading configuration");
    Ok(load_config_from(&path)?)
}

/// Apply command-line discovery overrides on top of the loaded file.
fn apply_overrides(cfg: &mut Config, opts: &DiscoveryOpts) {
    if let Some(mode) = opts.mode {
        cfg.scan.mode = match mode {
            ModeArg::Mdns => ScanModeSetting::Mdns,
            ModeArg::Range => ScanModeSetting::Range,
        };
    }
    if let Some(base) = opts.base_ip {
        cfg.scan.base_ip = Some(base.to_string());
    }
    if let Some(first) = opts.first {
        cfg.scan.first = first;
    }
    if let Some(last) = opts.last {
        cfg.scan.last = last;
    }
    if let Some(port) = opts.port {
        cfg.scan.probe_port = port;
    }
    if let Some(ref store) = opts.store {
        cfg.store.path = Some(store.clone());
    }
}

/// Build an engine from configuration and overrides. Does no I/O.
pub fn build_engine(global: &GlobalOpts, opts: &DiscoveryOpts) -> Result<Engine, CliError> {
    let mut cfg = load(global)?;
    apply_overrides(&mut cfg, opts);

    let mut engine_cfg = cfg.to_engine_config()?;
    if opts.no_store {
        engine_cfg.store_path = None;
    }

    let provider: Arc<dyn CredentialProvider> =
        if opts.no_prompt || !std::io::stdin().is_terminal() {
            Arc::new(NoCredentials)
        } else {
            Arc::new(TerminalCredentials)
        };

    Ok(Engine::new(engine_cfg, provider)?)
}

/// Persist the ghost store when one is configured.
pub async fn save_store(engine: &Engine, quiet: bool) -> Result<(), CliError> {
    let Some(path) = engine.config().store_path.clone() else {
        return Ok(());
    };
    let count = engine.save_store(&path).await?;
    if !quiet {
        eprintln!("Saved {count} device(s) to {}", path.display());
    }
    Ok(())
}
