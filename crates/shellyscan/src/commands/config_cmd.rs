//! Config subcommand handlers.

use std::net::Ipv4Addr;

use dialoguer::{Input, Select};

use shellyscan_config::{Config, ScanModeSetting, config_path, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);

    match args.command {
        ConfigCommand::Show => {
            let cfg = super::load(global)?;
            let rendered = toml::to_string_pretty(&cfg)?;
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force, defaults } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }

            let cfg = if defaults { Config::default() } else { wizard()? };
            // Validate before writing so a bad answer never lands on disk.
            cfg.to_engine_config()?;
            save_config(&cfg, &path)?;

            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }
    }
}

// ── Wizard ──────────────────────────────────────────────────────────

fn wizard() -> Result<Config, CliError> {
    let mut cfg = Config::default();

    let modes = &["mDNS browsing (recommended)", "IPv4 range sweep"];
    let mode = Select::new()
        .with_prompt("Discovery mode")
        .items(modes)
        .default(0)
        .interact()?;

    if mode == 1 {
        cfg.scan.mode = ScanModeSetting::Range;
        let base: Ipv4Addr = Input::new()
            .with_prompt("Network prefix")
            .default(Ipv4Addr::new(192, 168, 1, 0))
            .interact_text()?;
        cfg.scan.base_ip = Some(base.to_string());
        cfg.scan.first = Input::new()
            .with_prompt("First host")
            .default(cfg.scan.first)
            .interact_text()?;
        cfg.scan.last = Input::new()
            .with_prompt("Last host")
            .default(cfg.scan.last)
            .interact_text()?;
    }

    cfg.refresh.interval_ms = Input::new()
        .with_prompt("Refresh interval (ms)")
        .default(cfg.refresh.interval_ms)
        .interact_text()?;

    Ok(cfg)
}
