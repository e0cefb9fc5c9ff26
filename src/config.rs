use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub path: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReportConfig {
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_region_label_len")]
    pub region_label_len: usize,
    #[serde(default = "default_display_bimesters")]
    pub display_bimesters: usize,
    /// Divide each bimester by its own submitted+missing instead of reusing
    /// the 1st bimester total for every headline percentage.
    #[serde(default)]
    pub per_bimester_denominator: bool,
    #[serde(default = "default_sort")]
    pub default_sort: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            region_label_len: default_region_label_len(),
            display_bimesters: default_display_bimesters(),
            per_bimester_denominator: false,
            default_sort: default_sort(),
        }
    }
}

fn default_table() -> String {
    "df_escola".to_string()
}

fn default_max_rows() -> usize {
    2_000_000
}

fn default_page_size() -> usize {
    10
}

fn default_region_label_len() -> usize {
    9
}

fn default_display_bimesters() -> usize {
    3
}

fn default_sort() -> String {
    "missingPctB2".to_string()
}

pub const CONFIG_ENV: &str = "NOTASD_CONFIG";
pub const DATASET_ENV: &str = "NOTASD_DATASET";

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = r#"
[dataset]
path = "dados_tratados/df_escola.csv"
table = "df_escola"

[report]
page_size = 10
region_label_len = 9
display_bimesters = 3
per_bimester_denominator = false
default_sort = "missingPctB2"
"#;

/// Load configuration.
///
/// Search order:
/// 1. `$NOTASD_CONFIG`
/// 2. `config.toml` next to the executable
/// 3. the embedded default
///
/// `$NOTASD_DATASET` overrides `dataset.path` whichever file was used.
pub fn load_config() -> anyhow::Result<Config> {
    let mut config = match find_config_file() {
        Some(path) => {
            tracing::info!("loading config from {}", path.display());
            parse_config(&std::fs::read_to_string(&path)?)?
        }
        None => {
            tracing::info!("using default embedded configuration");
            parse_config(DEFAULT_CONFIG)?
        }
    };

    if let Ok(p) = std::env::var(DATASET_ENV) {
        if !p.trim().is_empty() {
            config.dataset.path = p;
        }
    }
    validate(&config)?;
    Ok(config)
}

pub fn parse_config(contents: &str) -> anyhow::Result<Config> {
    let config: Config = toml::from_str(contents)?;
    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if config.report.page_size == 0 {
        anyhow::bail!("report.page_size must be >= 1");
    }
    if !(1..=4).contains(&config.report.display_bimesters) {
        anyhow::bail!("report.display_bimesters must be in range 1..=4");
    }
    if crate::ranking::SortKey::parse(&config.report.default_sort).is_none() {
        anyhow::bail!(
            "report.default_sort must be one of: {}",
            crate::ranking::SortKey::allowed().join(", ")
        );
    }
    Ok(())
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(p) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(p);
        if path.is_file() {
            return Some(path);
        }
        tracing::warn!("{} points to a missing file: {}", CONFIG_ENV, path.display());
    }
    let exe_path = std::env::current_exe().ok()?;
    let candidate = exe_path.parent()?.join("config.toml");
    candidate.is_file().then_some(candidate)
}

/// Resolve the dataset path. Relative paths are taken from the working directory.
pub fn dataset_path(config: &Config) -> PathBuf {
    let p = Path::new(&config.dataset.path);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(p))
        .unwrap_or_else(|_| p.to_path_buf())
}
