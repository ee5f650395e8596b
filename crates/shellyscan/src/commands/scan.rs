//! `scan`: discover for a while, print what was found.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::cli::{GlobalOpts, ScanArgs};
use crate::error::CliError;

use super::devices;

pub async fn handle(args: ScanArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let engine = super::build_engine(global, &args.discovery)?;
    engine.start().await?;

    let wait = Duration::from_secs(args.duration);
    if !wait.is_zero() {
        let spinner = (!global.quiet && std::io::stderr().is_terminal()).then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message("Discovering devices");
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });

        let deadline = tokio::time::sleep(wait);
        tokio::pin!(deadline);
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tokio::select! {
                () = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
                _ = tick.tick() => {
                    if let Some(ref pb) = spinner {
                        pb.set_message(format!("Discovering devices ({} found)", engine.registry().len()));
                    }
                }
            }
        }
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
    }

    info!(devices = engine.registry().len(), "scan finished");
    devices::print_devices(&engine, global)?;
    super::save_store(&engine, global.quiet).await?;
    engine.close();
    Ok(())
}
