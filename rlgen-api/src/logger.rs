use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::{
    fs::{self, File, OpenOptions},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Filter built from `RUST_LOG` style directives, `info` when they are missing or malformed.
pub fn tracing_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global `tracing` subscriber, `RUST_LOG` replaces the default `info` level.
pub fn init_tracing() -> Result<()> {
    let directives = std::env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter(directives.as_deref()))
        .try_init()
        .map_err(|err| anyhow::anyhow!(err))
}

/// Per experiment output directory with a `variant.json` and a tabular `progress.csv`.
#[derive(Debug)]
pub struct ExperimentLogger {
    log_dir: PathBuf,
    row: Vec<(String, f32)>,
    header: Option<Vec<String>>,
    progress: BufWriter<File>,
}

/// Creates `<base_dir>/<exp_prefix>/<exp_prefix>--s-<seed>--<exp_id>` and dumps `variant` into it.
pub fn setup_logger(
    base_dir: &Path,
    exp_prefix: &str,
    exp_id: usize,
    seed: usize,
    variant: &impl Serialize,
) -> Result<ExperimentLogger> {
    let log_dir = base_dir
        .join(exp_prefix)
        .join(format!("{exp_prefix}--s-{seed}--{exp_id}"));
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log directory {}", log_dir.display()))?;
    let variant_file = File::create(log_dir.join("variant.json"))?;
    serde_json::to_writer_pretty(variant_file, variant).context("writing variant.json")?;
    let progress = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_dir.join("progress.csv"))?;
    info!("logging to {}", log_dir.display());
    Ok(ExperimentLogger {
        log_dir,
        row: vec![],
        header: None,
        progress: BufWriter::new(progress),
    })
}

impl ExperimentLogger {
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn record_tabular(&mut self, key: impl Into<String>, value: f32) {
        self.row.push((key.into(), value));
    }

    /// Appends the recorded row to `progress.csv`. The first dump fixes the columns, later rows
    /// must use the same keys in the same order.
    pub fn dump_tabular(&mut self) -> Result<()> {
        let row = std::mem::take(&mut self.row);
        let keys: Vec<String> = row.iter().map(|(key, _)| key.clone()).collect();
        match &self.header {
            None => {
                writeln!(self.progress, "{}", keys.join(","))?;
                self.header = Some(keys);
            }
            Some(header) if *header != keys => {
                bail!("tabular keys changed between dumps: {header:?} vs {keys:?}")
            }
            Some(_) => {}
        }
        let values: Vec<String> = row.iter().map(|(_, value)| value.to_string()).collect();
        writeln!(self.progress, "{}", values.join(","))?;
        self.progress.flush()?;
        for (key, value) in row.iter() {
            info!("{key:<32} {value}");
        }
        Ok(())
    }
}
