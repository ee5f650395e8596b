//! Clap derive structures for the `shellyscan` CLI.

use std::net::Ipv4Addr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// shellyscan -- find and monitor Shelly devices on the local network
#[derive(Debug, Parser)]
#[command(
    name = "shellyscan",
    version,
    about = "Discover and monitor Shelly devices on the local network",
    long_about = "Finds Shelly devices by mDNS browsing or by sweeping an IPv4 range,\n\
        identifies their generation and model, and keeps them polled.\n\n\
        Devices seen before but unreachable now are kept as ghosts in a\n\
        local store, together with your notes.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, env = "SHELLYSCAN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one MAC per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run a discovery session and print the devices found
    #[command(alias = "s")]
    Scan(ScanArgs),

    /// Discover, then stream registry changes until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Discovery options ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ModeArg {
    /// Browse mDNS advertisements
    Mdns,
    /// Sweep an IPv4 host range
    Range,
}

/// Overrides for the `[scan]`/`[store]` configuration sections.
#[derive(Debug, Args)]
pub struct DiscoveryOpts {
    /// Discovery mode
    #[arg(long, short = 'm')]
    pub mode: Option<ModeArg>,

    /// Network prefix for range mode (last octet ignored)
    #[arg(long)]
    pub base_ip: Option<Ipv4Addr>,

    /// First host number of the range
    #[arg(long)]
    pub first: Option<u8>,

    /// Last host number of the range
    #[arg(long)]
    pub last: Option<u8>,

    /// Port probed in range mode
    #[arg(long)]
    pub port: Option<u16>,

    /// Ghost store file
    #[arg(long, conflicts_with = "no_store")]
    pub store: Option<PathBuf>,

    /// Neither load nor save the ghost store
    #[arg(long)]
    pub no_store: bool,

    /// Never prompt for device credentials
    #[arg(long)]
    pub no_prompt: bool,
}

#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub discovery: DiscoveryOpts,

    /// Seconds to keep discovering before printing
    #[arg(long, short = 'd', default_value = "10")]
    pub duration: u64,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    #[command(flatten)]
    pub discovery: DiscoveryOpts,

    /// Stop after this many seconds (default: until Ctrl-C)
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the effective configuration (file + environment)
    Show,

    /// Print the configuration file path
    Path,

    /// Write a new configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,

        /// Write defaults without asking
        #[arg(long)]
        defaults: bool,
    },
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
