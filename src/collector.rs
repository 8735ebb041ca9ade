use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use serde::Serialize;
use tracing::{debug, info};

use crate::cancel::CancellationToken;
use crate::config::CollectorSettings;
use crate::domain::{Term, Triple};
use crate::error::TaxonomyError;
use crate::gateway::QueryGateway;
use crate::sparql;

#[derive(Debug, Clone, Default, Serialize)]
pub struct Neighborhood {
    pub triples: BTreeSet<Triple>,
    pub processed: BTreeSet<String>,
    pub queries: usize,
    #[serde(skip)]
    responses: usize,
}

impl Neighborhood {
    pub fn len(&self) -> usize {
        self.triples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triples.is_empty()
    }
}

pub struct NeighborhoodCollector<'a, G: QueryGateway + ?Sized> {
    gateway: &'a G,
    settings: &'a CollectorSettings,
    cancel: CancellationToken,
}

type BatchOutcome = Result<(usize, Vec<Triple>), TaxonomyError>;

impl<'a, G: QueryGateway + ?Sized> NeighborhoodCollector<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a CollectorSettings) -> Self {
        Self {
            gateway,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn collect(&self, entities: &[String]) -> Result<Neighborhood, TaxonomyError> {
        let mut neighborhood = Neighborhood::default();
        self.collect_into(&mut neighborhood, entities)?;
        Ok(neighborhood)
    }

    /// Adds the neighborhoods of `entities` not yet in `acc.processed`.
    /// Blank nodes are relabelled per response, since their labels only hold within one.
    pub fn collect_into(
        &self,
        acc: &mut Neighborhood,
        entities: &[String],
    ) -> Result<usize, TaxonomyError> {
        let mut seen = HashSet::new();
        let pending: Vec<String> = entities
            .iter()
            .filter(|uri| !acc.processed.contains(*uri) && seen.insert(uri.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        let batches: Vec<&[String]> = pending.chunks(self.settings.batch_size.max(1)).collect();
        let first_response = acc.responses;
        acc.responses += batches.len();
        let workers = self.settings.workers.clamp(1, batches.len());
        let cursor = AtomicUsize::new(0);
        let stop = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<BatchOutcome>();
        let mut failure: Option<TaxonomyError> = None;
        let mut done = 0usize;

        thread::scope(|scope| {
            for _ in 0..workers {
                let tx = tx.clone();
                let (cursor, stop, batches) = (&cursor, &stop, &batches);
                let gateway = self.gateway;
                let cancel = &self.cancel;
                scope.spawn(move || {
                    while !stop.load(Ordering::Relaxed) && !cancel.is_cancelled() {
                        let idx = cursor.fetch_add(1, Ordering::Relaxed);
                        let Some(batch) = batches.get(idx) else {
                            break;
                        };
                        let labels = format!("q{}", first_response + idx);
                        let outcome =
                            fetch_batch(gateway, batch, &labels).map(|triples| (idx, triples));
                        if tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            for outcome in rx {
                match outcome {
                    Ok((idx, triples)) => {
                        acc.queries += 1;
                        acc.triples.extend(triples);
                        acc.processed.extend(batches[idx].iter().cloned());
                        done += batches[idx].len();
                        debug!(batch = idx, processed = done, total = pending.len(), "neighborhood batch merged");
                    }
                    Err(err) => {
                        stop.store(true, Ordering::Relaxed);
                        failure.get_or_insert(err);
                    }
                }
            }
        });

        if let Some(err) = failure {
            return Err(err);
        }
        if done < pending.len() {
            self.cancel.check()?;
        }
        info!(entities = done, triples = acc.triples.len(), "neighborhoods collected");
        Ok(done)
    }
}

fn fetch_batch<G: QueryGateway + ?Sized>(
    gateway: &G,
    batch: &[String],
    scope: &str,
) -> Result<Vec<Triple>, TaxonomyError> {
    let query = sparql::neighborhood_query(batch)?;
    let rows = gateway.execute(&query)?;
    let mut triples = Vec::with_capacity(rows.len());
    for row in &rows.rows {
        let subject = match row.get("s") {
            Some(term @ (Term::Uri(_) | Term::Blank(_))) => term.clone().scoped(scope),
            _ => continue,
        };
        let (Some(predicate), Some(object)) = (row.uri("p"), row.get("o")) else {
            continue;
        };
        triples.push(Triple::new(subject, predicate, object.clone().scoped(scope)));
    }
    Ok(triples)
}
