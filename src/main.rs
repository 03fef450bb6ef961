//! CLI entry point for lcls-live
//!
//! Provides:
//! - `render`: turn a PV snapshot into Bmad or Tao statements
//! - `pvlist`: print the PVs a datamap set needs
//! - `locate`: pull the archived snapshot nearest a timestamp
//!
//! # Usage
//!
//! ```bash
//! lcls-live render --snapshot pvdata.json --beampath cu_hxr --dialect bmad
//! lcls-live render --snapshot pvdata.json --datamaps datamaps.json --config-name cu_sxr --use-des klystron
//! lcls-live locate --beampath cu_hxr --time 2021-12-11T00:00:00-08:00 --pv KLYS:LI22:11:ENLD
//! ```

use anyhow::{Context, Result};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand};
use lcls_live::archive::ShardLocator;
use lcls_live::builders::{default_datamaps, Beampath};
use lcls_live::cache::{JsonFileSource, PvCache};
use lcls_live::config::{Settings, DEFAULT_CONFIG_PATH};
use lcls_live::datamap::{DataMapSet, Dialect, UseDes};
use lcls_live::logging;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser)]
#[command(name = "lcls-live")]
#[command(about = "Translate live or archived PV snapshots into model statements", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render statements for a snapshot
    Render {
        /// Snapshot JSON file of `{ "PV": value }`
        #[arg(long)]
        snapshot: PathBuf,

        #[command(flatten)]
        maps: MapSelection,

        /// bmad, tao, or a custom template (defaults to the configured dialect)
        #[arg(long)]
        dialect: Option<String>,

        /// Write statements here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Print every PV a datamap set reads
    Pvlist {
        #[command(flatten)]
        maps: MapSelection,
    },

    /// Extract the archived snapshot at or after a time
    Locate {
        /// Beam path, e.g. cu_hxr
        #[arg(long)]
        beampath: String,

        /// RFC 3339 timestamp with offset
        #[arg(long)]
        time: String,

        /// Archive root, bypassing the configured search paths
        #[arg(long)]
        root: Option<PathBuf>,

        /// PVs to extract (all when omitted)
        #[arg(long = "pv")]
        pvs: Vec<String>,

        /// Write the snapshot JSON here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args)]
struct MapSelection {
    /// Master datamap document
    #[arg(long, requires = "config_name", conflicts_with = "beampath")]
    datamaps: Option<PathBuf>,

    /// Configuration inside the master document
    #[arg(long)]
    config_name: Option<String>,

    /// Use the built-in datamaps of a beam path
    #[arg(long)]
    beampath: Option<String>,

    /// Maps reading design values: all, none, or a comma list (`klystron` = every klystron)
    #[arg(long, default_value = "none")]
    use_des: String,
}

impl MapSelection {
    fn load(&self) -> Result<DataMapSet> {
        let use_des: UseDes = self.use_des.parse()?;
        match (&self.datamaps, &self.config_name, &self.beampath) {
            (Some(path), Some(name), _) => Ok(DataMapSet::load_master(path, name, &use_des)?),
            (None, _, Some(beampath)) => {
                let mut set = default_datamaps(beampath.parse::<Beampath>()?);
                set.apply_use_des(&use_des);
                Ok(set)
            }
            _ => anyhow::bail!("Select datamaps with --datamaps/--config-name or --beampath"),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load_from(&cli.config)
        .with_context(|| format!("Failed to load settings from {}", cli.config.display()))?;
    if let Some(level) = cli.log_level {
        settings.application.log_level = level;
    }
    logging::init_from_settings(&settings)?;

    match cli.command {
        Commands::Render {
            snapshot,
            maps,
            dialect,
            output,
        } => render(&settings, &snapshot, &maps, dialect.as_deref(), output.as_deref()),
        Commands::Pvlist { maps } => {
            for pv in maps.load()?.pv_list() {
                println!("{pv}");
            }
            Ok(())
        }
        Commands::Locate {
            beampath,
            time,
            root,
            pvs,
            output,
        } => locate(&settings, &beampath, &time, root, &pvs, output.as_deref()),
    }
}

fn render(
    settings: &Settings,
    snapshot: &Path,
    maps: &MapSelection,
    dialect: Option<&str>,
    output: Option<&Path>,
) -> Result<()> {
    let set = maps.load()?;
    let dialect: Dialect = match dialect {
        Some(d) => d.parse()?,
        None => settings.dialect()?,
    };

    let mut cache = PvCache::new(JsonFileSource::new(snapshot));
    cache.track(set.pv_list());
    let snap = cache
        .refresh()
        .with_context(|| format!("Failed to read snapshot {}", snapshot.display()))?;

    let lines = set.format(snap, &dialect)?;
    info!(datamaps = set.len(), statements = lines.len(), %dialect, "Rendered statements");
    emit(&(lines.join("\n") + "\n"), output)
}

fn locate(
    settings: &Settings,
    beampath: &str,
    time: &str,
    root: Option<PathBuf>,
    pvs: &[String],
    output: Option<&Path>,
) -> Result<()> {
    let timestamp = DateTime::parse_from_rfc3339(time)
        .with_context(|| format!("Invalid RFC 3339 timestamp '{time}'"))?;
    let locator = match root {
        Some(root) => ShardLocator::new(vec![root], &settings.archive.extension),
        None => ShardLocator::from_settings(&settings.archive),
    };

    let pv_names = (!pvs.is_empty()).then_some(pvs);
    let archived = locator.snapshot_at(timestamp, beampath, pv_names)?;
    emit(&serde_json::to_string_pretty(&archived)?, output)
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, text)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote output");
        }
        None => print!("{text}"),
    }
    Ok(())
}
