use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};
use tablescan_core::{PrefixScanConfig, TableScanConfig, WorkerConfig};
use tracing::debug;

pub const CONFIG_PATH_VAR: &str = "TABLESCAN_CONFIG_PATH";
pub const CONFIG_JSON_VAR: &str = "TABLESCAN_CONFIG_JSON";

const DEFAULT_FILES: &[&str] = &[
    "tablescan.toml",
    "tablescan.json",
    "config/tablescan.toml",
    "config/tablescan.json",
];

/// Source that produced the scan settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanSettingsSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

/// Table scan settings as they appear on disk.
///
/// ```toml
/// [prefix_scan]
/// take_count = 500
/// segments_per_first_prefix = 2
///
/// [worker]
/// workers = 8
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Paging and expansion knobs shared by every runner. Lower `take_count`
    /// to fan out into more, smaller steps.
    pub prefix_scan: PrefixScanConfig,
    /// Queue worker pool. `max_dequeue_count` bounds redelivery of messages
    /// failing with transient store or queue errors.
    pub worker: WorkerConfig,
}

impl From<ScanSettings> for TableScanConfig {
    fn from(settings: ScanSettings) -> Self {
        TableScanConfig {
            prefix_scan: settings.prefix_scan,
            worker: settings.worker,
        }
    }
}

impl ScanSettings {
    pub fn table_scan_config(&self) -> TableScanConfig {
        self.clone().into()
    }

    /// Load settings using environment variables.
    /// Evaluation order:
    /// 1) `$TABLESCAN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$TABLESCAN_CONFIG_JSON` (inline JSON),
    /// 3) the first of `tablescan.{toml,json}` or `config/tablescan.{toml,json}`
    ///    in the working directory,
    /// 4) defaults.
    pub fn load_from_env() -> anyhow::Result<(Self, ScanSettingsSource)> {
        Self::load_from_lookup(|name| env::var(name).ok(), Path::new("."))
    }

    /// Same order as [`ScanSettings::load_from_env`] with an explicit variable
    /// lookup and directory for the default files.
    pub fn load_from_lookup<F>(
        lookup: F,
        base_dir: &Path,
    ) -> anyhow::Result<(Self, ScanSettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (settings, source) = Self::locate(&lookup, base_dir)?;
        settings.validate()?;
        debug!(source = ?source, "table scan settings loaded");
        Ok((settings, source))
    }

    fn locate<F>(
        lookup: &F,
        base_dir: &Path,
    ) -> anyhow::Result<(Self, ScanSettingsSource)>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path_str) = lookup(CONFIG_PATH_VAR)
            && !path_str.trim().is_empty()
        {
            let path = PathBuf::from(path_str);
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, ScanSettingsSource::EnvPath(path)));
        }

        if let Some(raw) = lookup(CONFIG_JSON_VAR)
            && !raw.trim().is_empty()
        {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_VAR}"))?;
            return Ok((parsed, ScanSettingsSource::EnvInline));
        }

        if let Some(path) = Self::find_default_file(base_dir) {
            let settings = Self::load_from_file(&path)?;
            return Ok((settings, ScanSettingsSource::File(path)));
        }

        Ok((Self::default(), ScanSettingsSource::Default))
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read scan settings from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents).with_context(|| {
                format!("invalid scan settings {}", path.display())
            }),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid scan settings {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse scan settings {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw)
            .map_err(|err| anyhow!("invalid scan settings json: {err}"))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.prefix_scan
            .validate()
            .context("invalid [prefix_scan] settings")?;
        self.worker.validate().context("invalid [worker] settings")
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.exists())
    }
}
