//! `watch`: stream registry changes until interrupted.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

use shellyscan_core::{Engine, RegistryEvent, RegistryEventKind};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

use super::devices::DeviceSummary;

#[derive(Serialize)]
struct EventLine {
    event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<DeviceSummary>,
}

pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let engine = super::build_engine(global, &args.discovery)?;
    // Subscribe before start so the initial ADDs are not missed.
    let mut events = engine.subscribe();
    engine.start().await?;

    let deadline = async {
        match args.duration {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(deadline);

    // Last printed status per index; updates are shown only on change.
    let mut seen: HashMap<usize, String> = HashMap::new();

    loop {
        tokio::select! {
            biased;
            _ = tokio::signal::ctrl_c() => break,
            () = &mut deadline => break,
            event = events.recv() => match event {
                Ok(event) => {
                    if let Some(line) = describe(&engine, event, &mut seen) {
                        emit(&line, global)?;
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    super::save_store(&engine, global.quiet).await?;
    engine.close();
    Ok(())
}

fn describe(
    engine: &Engine,
    event: RegistryEvent,
    seen: &mut HashMap<usize, String>,
) -> Option<EventLine> {
    let device = event
        .index
        .and_then(|i| engine.get(i).map(|d| DeviceSummary::new(engine, i, &d)));

    match event.kind {
        RegistryEventKind::Update => {
            let summary = device?;
            let previous = seen.insert(summary.index, summary.status.clone());
            if previous.as_deref() == Some(summary.status.as_str()) {
                return None;
            }
            Some(line(event, Some(summary)))
        }
        RegistryEventKind::Clear => {
            seen.clear();
            Some(line(event, None))
        }
        RegistryEventKind::Delete => {
            // Indices after the removed one shift down.
            seen.clear();
            Some(line(event, None))
        }
        RegistryEventKind::Add | RegistryEventKind::Substitute => {
            if let Some(ref s) = device {
                seen.insert(s.index, s.status.clone());
            }
            Some(line(event, device))
        }
        RegistryEventKind::Ready => Some(line(event, None)),
    }
}

fn line(event: RegistryEvent, device: Option<DeviceSummary>) -> EventLine {
    EventLine {
        event: event.kind.to_string(),
        index: event.index,
        device,
    }
}

fn emit(line: &EventLine, global: &GlobalOpts) -> Result<(), CliError> {
    if global.quiet {
        return Ok(());
    }
    match global.output {
        OutputFormat::Json | OutputFormat::JsonCompact => {
            println!("{}", output::json_line(line)?);
        }
        OutputFormat::Plain => {
            if let Some(ref d) = line.device {
                println!("{} {}", line.event, d.mac);
            } else {
                println!("{}", line.event);
            }
        }
        OutputFormat::Table => match (&line.index, &line.device) {
            (Some(i), Some(d)) => println!(
                "{:<10} #{i:<3} {} ({}, {}:{}) {}",
                line.event, d.name, d.mac, d.address, d.port, d.status
            ),
            (Some(i), None) => println!("{:<10} #{i}", line.event),
            _ => println!("{}", line.event),
        },
    }
    Ok(())
}
