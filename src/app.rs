use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{info, warn};

use crate::admin::{DatasetAdmin, DatasetKind, UploadReceipt};
use crate::cancel::CancellationToken;
use crate::collector::NeighborhoodCollector;
use crate::config::ResolvedConfig;
use crate::domain::{Entity, GraphFormat, InputFormat, RankWhitelist, TaxonRef, Triple};
use crate::error::TaxonomyError;
use crate::gateway::{QueryGateway, RankCount, count_triples, rank_census};
use crate::parser::{ParseStats, TripleStream};
use crate::report::{GraphSummary, ProcessingReport};
use crate::resolver::{DescendantResolver, ResolveStrategy};
use crate::serializer::{self, ExportReport};
use crate::store::{LoadStats, TripleStore};

#[derive(Debug, Clone, Serialize)]
pub struct LoadResult {
    pub input: String,
    pub database: String,
    pub format: InputFormat,
    pub parse: ParseStats,
    pub stats: LoadStats,
    pub entities: Option<usize>,
    pub elapsed_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConvertResult {
    pub input: String,
    pub parse: ParseStats,
    pub summary: GraphSummary,
    pub export: ExportReport,
    pub summary_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportResult {
    pub database: String,
    pub summary: GraphSummary,
    pub export: ExportReport,
    pub summary_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResult {
    pub database: String,
    pub stats: LoadStats,
    pub summary: GraphSummary,
    pub indexes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractResult {
    pub root: String,
    pub strategy: ResolveStrategy,
    pub entities: usize,
    pub queries: usize,
    pub summary: GraphSummary,
    pub export: ExportReport,
    pub summary_file: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct RanksResult {
    pub endpoint_triples: Option<u64>,
    pub ranks: Vec<RankCount>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub created: Option<DatasetKind>,
    pub receipt: UploadReceipt,
    pub triples: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ExportTarget {
    pub out_dir: PathBuf,
    pub stem: String,
    pub formats: Vec<GraphFormat>,
}

impl ExportTarget {
    fn summary_path(&self) -> PathBuf {
        self.out_dir.join(format!("{}_summary.txt", self.stem))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Overrides the configured whitelist.
    pub ranks: Option<RankWhitelist>,
    /// Also collect the root's own neighborhood.
    pub include_root: bool,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<G: QueryGateway> {
    config: ResolvedConfig,
    gateway: G,
    cancel: CancellationToken,
}

impl<G: QueryGateway> App<G> {
    pub fn new(config: ResolvedConfig, gateway: G) -> Self {
        Self {
            config,
            gateway,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    /// Streams `input` into the dataset at `database`, then indexes it.
    pub fn load(
        &self,
        input: &Path,
        format: Option<InputFormat>,
        database: &Utf8Path,
        refresh_entities: bool,
        sink: &dyn ProgressSink,
    ) -> Result<LoadResult, TaxonomyError> {
        let started = Instant::now();
        let format = resolve_format(input, format)?;
        let mut stream = TripleStream::open(input, format)?;
        sink.event(ProgressEvent {
            message: format!("phase=Parse; streaming {} as {format}", input.display()),
            elapsed: None,
        });

        let mut store = TripleStore::open(database, self.config.store.batch_size)?
            .with_context(input.display().to_string());
        let stats = store.append(&mut stream, sink)?;
        let parse = stream.stats();
        if parse.parsed == 0 && parse.skipped > 0 {
            return Err(TaxonomyError::Parse(format!(
                "no triple in {} could be parsed ({} records skipped)",
                input.display(),
                parse.skipped
            )));
        }

        let entities = if refresh_entities {
            sink.event(ProgressEvent {
                message: "phase=Entities; projecting entity rows".to_string(),
                elapsed: Some(started.elapsed()),
            });
            Some(store.refresh_entities()?)
        } else {
            None
        };

        info!(
            input = %input.display(),
            parsed = parse.parsed,
            skipped = parse.skipped,
            total = stats.total_triples,
            "load finished"
        );
        Ok(LoadResult {
            input: input.display().to_string(),
            database: database.to_string(),
            format,
            parse,
            stats,
            entities,
            elapsed_secs: started.elapsed().as_secs_f64(),
        })
    }

    pub fn convert(
        &self,
        input: &Path,
        format: Option<InputFormat>,
        target: &ExportTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ConvertResult, TaxonomyError> {
        let started = Instant::now();
        let format = resolve_format(input, format)?;
        let mut stream = TripleStream::open(input, format)?;
        sink.event(ProgressEvent {
            message: format!("phase=Parse; reading {}", input.display()),
            elapsed: None,
        });
        let graph: BTreeSet<Triple> = stream.by_ref().collect();
        let parse = stream.stats();
        if parse.parsed == 0 && parse.skipped > 0 {
            return Err(TaxonomyError::Parse(format!(
                "no triple in {} could be parsed",
                input.display()
            )));
        }

        let summary = GraphSummary::from_triples(&graph);
        sink.event(ProgressEvent {
            message: format!("phase=Write; {} triples", graph.len()),
            elapsed: Some(started.elapsed()),
        });
        let export = serializer::export(graph, None, &target.formats, &target.out_dir, &target.stem)?;
        let summary_file = target.summary_path();
        ProcessingReport::new(&target.stem, summary, started.elapsed()).write_to(&summary_file)?;

        Ok(ConvertResult {
            input: input.display().to_string(),
            parse,
            summary,
            export,
            summary_file,
        })
    }

    pub fn export(
        &self,
        database: &Utf8Path,
        target: &ExportTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ExportResult, TaxonomyError> {
        let started = Instant::now();
        let store = self.open_existing(database)?;
        let summary = store.summary()?;
        sink.event(ProgressEvent {
            message: format!("phase=Read; {} triples", summary.total_triples),
            elapsed: None,
        });

        let mut graph = BTreeSet::new();
        store.for_each_triple(|triple| {
            self.cancel.check()?;
            graph.insert(triple);
            Ok(())
        })?;
        let export = serializer::export(graph, None, &target.formats, &target.out_dir, &target.stem)?;
        let summary_file = target.summary_path();
        ProcessingReport::new(&target.stem, summary, started.elapsed()).write_to(&summary_file)?;

        Ok(ExportResult {
            database: database.to_string(),
            summary,
            export,
            summary_file,
        })
    }

    pub fn stats(&self, database: &Utf8Path) -> Result<StatsResult, TaxonomyError> {
        let store = self.open_existing(database)?;
        Ok(StatsResult {
            database: database.to_string(),
            stats: store.counts()?,
            summary: store.summary()?,
            indexes: store.index_names()?,
        })
    }

    pub fn entity(&self, database: &Utf8Path, uri: &str) -> Result<Option<Entity>, TaxonomyError> {
        let store = self.open_existing(database)?;
        store.entity(uri, &self.config.resolver.rank_predicate)
    }

    /// Probe, resolve descendants, collect their neighborhoods and write them out.
    pub fn extract(
        &self,
        root: &TaxonRef,
        options: &ExtractOptions,
        target: &ExportTarget,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractResult, TaxonomyError> {
        let started = Instant::now();
        sink.event(ProgressEvent {
            message: "phase=Probe; checking query endpoint".to_string(),
            elapsed: None,
        });
        self.gateway.probe()?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; descendants of {root}"),
            elapsed: Some(started.elapsed()),
        });
        let whitelist = options.ranks.as_ref().unwrap_or(&self.config.resolver.ranks);
        let closure = DescendantResolver::new(&self.gateway, &self.config.resolver)
            .with_cancel(self.cancel.clone())
            .resolve(root, whitelist)?;

        let mut uris = closure.uris();
        if options.include_root {
            uris.insert(0, root.as_str().to_string());
        }
        sink.event(ProgressEvent {
            message: format!("phase=Collect; {} entities", uris.len()),
            elapsed: Some(started.elapsed()),
        });
        let neighborhood = NeighborhoodCollector::new(&self.gateway, &self.config.collector)
            .with_cancel(self.cancel.clone())
            .collect(&uris)?;

        let summary = GraphSummary::from_triples(&neighborhood.triples);
        sink.event(ProgressEvent {
            message: format!("phase=Write; {} triples", neighborhood.triples.len()),
            elapsed: Some(started.elapsed()),
        });
        let export = serializer::export(
            neighborhood.triples,
            Some(&self.config.ontology),
            &target.formats,
            &target.out_dir,
            &target.stem,
        )?;
        let summary_file = target.summary_path();
        ProcessingReport::new(&target.stem, summary, started.elapsed()).write_to(&summary_file)?;

        Ok(ExtractResult {
            root: root.to_string(),
            strategy: closure.strategy,
            entities: closure.entities.len(),
            queries: closure.queries + neighborhood.queries,
            summary,
            export,
            summary_file,
        })
    }

    pub fn ranks(&self, with_total: bool) -> Result<RanksResult, TaxonomyError> {
        self.gateway.probe()?;
        let endpoint_triples = if with_total {
            Some(count_triples(&self.gateway)?)
        } else {
            None
        };
        Ok(RanksResult {
            endpoint_triples,
            ranks: rank_census(&self.gateway, &self.config.resolver.rank_predicate)?,
        })
    }

    /// Optionally creates `dataset`, uploads `file` into `graph` and reports the
    /// endpoint's triple count afterwards.
    pub fn upload<A: DatasetAdmin + ?Sized>(
        &self,
        admin: &A,
        file: &Path,
        graph: &str,
        create: Option<DatasetKind>,
        sink: &dyn ProgressSink,
    ) -> Result<UploadResult, TaxonomyError> {
        let started = Instant::now();
        let dataset = &self.config.gateway.dataset;
        if let Some(kind) = create {
            admin.create_dataset(dataset, kind)?;
        }
        sink.event(ProgressEvent {
            message: format!("phase=Upload; {} into {dataset}", file.display()),
            elapsed: None,
        });
        let receipt = admin.upload(dataset, file, graph)?;
        sink.event(ProgressEvent {
            message: "phase=Count; counting endpoint triples".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let triples = match count_triples(&self.gateway) {
            Ok(count) => Some(count),
            Err(err) => {
                warn!("uploaded, but the triple count query failed: {err}");
                None
            }
        };
        Ok(UploadResult {
            created: create,
            receipt,
            triples,
        })
    }

    fn open_existing(&self, database: &Utf8Path) -> Result<TripleStore, TaxonomyError> {
        if !database.exists() {
            return Err(TaxonomyError::InputNotFound(database.as_std_path().to_path_buf()));
        }
        TripleStore::open(database, self.config.store.batch_size)
    }
}

pub fn resolve_format(input: &Path, format: Option<InputFormat>) -> Result<InputFormat, TaxonomyError> {
    format.or_else(|| InputFormat::detect(input)).ok_or_else(|| {
        TaxonomyError::InvalidFormat(format!(
            "cannot tell the serialization of {}; pass --format",
            input.display()
        ))
    })
}

pub fn default_database(config: &ResolvedConfig) -> Utf8PathBuf {
    config.store.database_path(&config.gateway.dataset)
}
