use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::ops::Indexers;
use crate::quantity::Label;

/// Label under which the configuration is stored in the graph.
pub const CONFIG: &str = "config";

/// Default directory for cached results, relative to the working directory.
pub const DEFAULT_CACHE_PATH: &str = ".cache/reckon";

/// Configuration of a [`crate::Computer`].
///
/// Parsed from JSON; every section is optional. Unknown top-level sections
/// are kept in [`Config::extra`] and reported when the configuration is
/// applied.
///
/// ```rust
/// use reckon::Config;
///
/// let config = Config::from_json(r#"{
///     "cache_skip": true,
///     "units": { "replace": { "-": "dimensionless" } },
///     "alias": { "emissions": "emi:n-t" }
/// }"#).unwrap();
///
/// assert!(config.cache_skip);
/// assert_eq!(config.alias["emissions"], "emi:n-t");
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_path: Option<Utf8PathBuf>,
    pub cache_skip: bool,
    pub units: UnitsConfig,
    /// Key returned by [`crate::Computer::get_default`].
    pub default: Option<String>,
    /// New label to existing label.
    pub alias: IndexMap<String, String>,
    pub aggregate: Vec<AggregateConfig>,
    pub combine: Vec<CombineConfig>,
    pub general: Vec<GeneralConfig>,
    pub report: Vec<ReportConfig>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitsConfig {
    /// Symbol to definition, e.g. `"USD": "[currency]"` or `"kWa": "kW*a"`.
    pub define: IndexMap<String, String>,
    /// Text substitutions applied before parsing a unit.
    pub replace: IndexMap<String, String>,
}

/// Group sums along one dimension, registered with all partial sums.
///
/// ```json
/// { "_quantities": ["foo", "bar"], "_tag": "agg", "_dim": "n",
///   "World": ["AFR", "CHN"] }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    #[serde(rename = "_quantities")]
    pub quantities: Vec<String>,
    #[serde(rename = "_tag")]
    pub tag: String,
    #[serde(rename = "_dim")]
    pub dim: String,
    #[serde(flatten)]
    pub groups: IndexMap<String, Vec<Label>>,
}

/// A weighted sum of several quantities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineConfig {
    pub key: String,
    pub inputs: Vec<CombineInput>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombineInput {
    pub quantity: String,
    #[serde(default)]
    pub select: Indexers,
    #[serde(default = "unit_weight")]
    pub weight: f64,
}

fn unit_weight() -> f64 {
    1.0
}

/// A task applying a built-in operator, by name, to existing quantities.
///
/// `comp` is an operator name from [`crate::ops::from_name`], or `product`
/// for [`crate::Computer::add_product`], in which case the dimensions of
/// `key` are inferred from the inputs.
///
/// ```json
/// { "comp": "sum", "key": "emi:n", "inputs": ["emi"], "args": { "dims": ["t"] } }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub comp: String,
    pub key: String,
    #[serde(default)]
    pub inputs: Vec<String>,
    #[serde(default)]
    pub args: serde_json::Map<String, serde_json::Value>,
    /// Also register every partial sum of `key`.
    #[serde(default)]
    pub sums: bool,
}

/// Several quantities stacked along a new dimension, one coordinate per
/// member, labelled with the member's name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    pub key: String,
    pub members: Vec<String>,
    #[serde(default = "report_dim")]
    pub dim: String,
}

fn report_dim() -> String {
    "variable".into()
}

impl Config {
    pub fn from_json(text: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(text)?)
    }

    /// Reads a JSON configuration file. A relative `cache_path` is resolved
    /// against the directory containing the file.
    pub fn from_path(path: impl AsRef<Utf8Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_json(&text)?;

        if let Some(cache_path) = &config.cache_path
            && cache_path.is_relative()
            && let Some(dir) = path.parent()
        {
            config.cache_path = Some(dir.join(cache_path));
        }

        Ok(config)
    }

    pub fn cache_path(&self) -> Utf8PathBuf {
        self.cache_path
            .clone()
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_CACHE_PATH))
    }
}
