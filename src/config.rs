use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::domain::RankWhitelist;
use crate::error::TaxonomyError;
use crate::resolver::ResolveStrategy;
use crate::serializer::OntologyHeader;
use crate::vocab;

pub const DEFAULT_CONFIG_FILE: &str = "kira-tx.json";
pub const DEFAULT_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub endpoint: Option<EndpointEntry>,
    #[serde(default)]
    pub store: Option<StoreEntry>,
    #[serde(default)]
    pub taxonomy: Option<TaxonomyEntry>,
    #[serde(default)]
    pub collector: Option<CollectorEntry>,
    #[serde(default)]
    pub ontology: Option<OntologyEntry>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EndpointEntry {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub dataset: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub probe_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreEntry {
    #[serde(default)]
    pub data_root: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct TaxonomyEntry {
    #[serde(default)]
    pub hierarchy_predicate: Option<String>,
    #[serde(default)]
    pub rank_predicate: Option<String>,
    #[serde(default)]
    pub ranks: Option<Vec<String>>,
    #[serde(default)]
    pub strategy: Option<ResolveStrategy>,
    #[serde(default)]
    pub frontier_batch: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct CollectorEntry {
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct OntologyEntry {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub base_url: String,
    pub dataset: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub probe_timeout: Duration,
}

impl GatewaySettings {
    pub fn sparql_url(&self) -> String {
        format!("{}/{}/sparql", self.base_url.trim_end_matches('/'), self.dataset)
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3030".to_string(),
            dataset: "ncbitaxon".to_string(),
            timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub data_root: Utf8PathBuf,
    pub batch_size: usize,
}

impl StoreSettings {
    pub fn database_path(&self, dataset: &str) -> Utf8PathBuf {
        self.data_root.join("datasets").join(format!("{dataset}.db"))
    }
}

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub hierarchy_predicate: String,
    pub rank_predicate: String,
    pub ranks: RankWhitelist,
    pub strategy: ResolveStrategy,
    pub frontier_batch: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            hierarchy_predicate: vocab::RDFS_SUBCLASS_OF.to_string(),
            rank_predicate: vocab::NCBITAXON_HAS_RANK.to_string(),
            ranks: RankWhitelist::default(),
            strategy: ResolveStrategy::Auto,
            frontier_batch: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CollectorSettings {
    pub batch_size: usize,
    pub workers: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            batch_size: 25,
            workers: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub gateway: GatewaySettings,
    pub store: StoreSettings,
    pub resolver: ResolverSettings,
    pub collector: CollectorSettings,
    pub ontology: OntologyHeader,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads `path`, or `kira-tx.json` in the working directory when present.
    /// Without either, every setting takes its default.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, TaxonomyError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Self::resolve_config(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| TaxonomyError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| TaxonomyError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, TaxonomyError> {
        let schema_version = config.schema_version.unwrap_or(1);

        let defaults = GatewaySettings::default();
        let endpoint = config.endpoint.unwrap_or_default();
        let gateway = GatewaySettings {
            base_url: endpoint.url.unwrap_or(defaults.base_url),
            dataset: endpoint.dataset.unwrap_or(defaults.dataset),
            timeout: endpoint
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            connect_timeout: endpoint
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            probe_timeout: endpoint
                .probe_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.probe_timeout),
        };

        let store_entry = config.store.unwrap_or_default();
        let data_root = match store_entry.data_root {
            Some(root) => Utf8PathBuf::from(root),
            None => default_data_root()?,
        };
        let store = StoreSettings {
            data_root,
            batch_size: positive(store_entry.batch_size, DEFAULT_BATCH_SIZE, "store.batch_size")?,
        };

        let defaults = ResolverSettings::default();
        let taxonomy = config.taxonomy.unwrap_or_default();
        let ranks = match taxonomy.ranks {
            Some(ranks) => RankWhitelist::parse(ranks)?,
            None => defaults.ranks,
        };
        let resolver = ResolverSettings {
            hierarchy_predicate: taxonomy
                .hierarchy_predicate
                .unwrap_or(defaults.hierarchy_predicate),
            rank_predicate: taxonomy.rank_predicate.unwrap_or(defaults.rank_predicate),
            ranks,
            strategy: taxonomy.strategy.unwrap_or(defaults.strategy),
            frontier_batch: positive(
                taxonomy.frontier_batch,
                defaults.frontier_batch,
                "taxonomy.frontier_batch",
            )?,
        };

        let defaults = CollectorSettings::default();
        let collector_entry = config.collector.unwrap_or_default();
        let collector = CollectorSettings {
            batch_size: positive(
                collector_entry.batch_size,
                defaults.batch_size,
                "collector.batch_size",
            )?,
            workers: positive(collector_entry.workers, defaults.workers, "collector.workers")?,
        };

        let defaults = OntologyHeader::default();
        let ontology_entry = config.ontology.unwrap_or_default();
        let ontology = OntologyHeader {
            uri: ontology_entry.uri.unwrap_or(defaults.uri),
            label: ontology_entry.label.unwrap_or(defaults.label),
            comment: ontology_entry.comment.unwrap_or(defaults.comment),
        };

        Ok(ResolvedConfig {
            schema_version,
            gateway,
            store,
            resolver,
            collector,
            ontology,
        })
    }
}

fn positive(value: Option<usize>, default: usize, key: &str) -> Result<usize, TaxonomyError> {
    match value {
        Some(0) => Err(TaxonomyError::ConfigParse(format!("{key} must be at least 1"))),
        Some(value) => Ok(value),
        None => Ok(default),
    }
}

pub fn default_data_root() -> Result<Utf8PathBuf, TaxonomyError> {
    BaseDirs::new()
        .and_then(|dirs| {
            Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("kira-taxonomy")).ok()
        })
        .ok_or_else(|| TaxonomyError::Filesystem("unable to resolve data directory".to_string()))
}
