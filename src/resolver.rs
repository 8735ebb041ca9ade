use std::collections::{BTreeMap, HashSet};
use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::config::ResolverSettings;
use crate::domain::{Entity, RankWhitelist, TaxonRef};
use crate::error::TaxonomyError;
use crate::gateway::{QueryGateway, Row};
use crate::sparql;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ResolveStrategy {
    /// Transitive-path query, falling back to a walk when the endpoint rejects it.
    #[default]
    Auto,
    Closure,
    Bfs,
}

impl fmt::Display for ResolveStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveStrategy::Auto => write!(f, "auto"),
            ResolveStrategy::Closure => write!(f, "closure"),
            ResolveStrategy::Bfs => write!(f, "bfs"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClosureResult {
    pub root: String,
    pub entities: Vec<Entity>,
    /// Strategy that produced the result; never `Auto`.
    pub strategy: ResolveStrategy,
    pub queries: usize,
}

impl ClosureResult {
    pub fn uris(&self) -> Vec<String> {
        self.entities.iter().map(|entity| entity.uri.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

pub struct DescendantResolver<'a, G: QueryGateway + ?Sized> {
    gateway: &'a G,
    settings: &'a ResolverSettings,
    cancel: CancellationToken,
}

type Found = BTreeMap<String, Entity>;

impl<'a, G: QueryGateway + ?Sized> DescendantResolver<'a, G> {
    pub fn new(gateway: &'a G, settings: &'a ResolverSettings) -> Self {
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

    pub fn resolve(
        &self,
        root: &TaxonRef,
        whitelist: &RankWhitelist,
    ) -> Result<ClosureResult, TaxonomyError> {
        let root = root.as_str();
        let mut queries = 0usize;
        let (found, strategy) = match self.settings.strategy {
            ResolveStrategy::Closure => (
                self.closure(root, whitelist, &mut queries)?,
                ResolveStrategy::Closure,
            ),
            ResolveStrategy::Bfs => (self.walk(root, whitelist, &mut queries)?, ResolveStrategy::Bfs),
            ResolveStrategy::Auto => match self.closure(root, whitelist, &mut queries) {
                Ok(found) => (found, ResolveStrategy::Closure),
                Err(err) if path_unsupported(&err) => {
                    warn!("endpoint rejected the transitive-path query ({err}); walking the hierarchy instead");
                    (self.walk(root, whitelist, &mut queries)?, ResolveStrategy::Bfs)
                }
                Err(err) => return Err(err),
            },
        };

        info!(
            root,
            strategy = %strategy,
            entities = found.len(),
            queries,
            "descendants resolved"
        );
        Ok(ClosureResult {
            root: root.to_string(),
            entities: found.into_values().collect(),
            strategy,
            queries,
        })
    }

    fn closure(
        &self,
        root: &str,
        whitelist: &RankWhitelist,
        queries: &mut usize,
    ) -> Result<Found, TaxonomyError> {
        self.cancel.check()?;
        let query = sparql::closure_query(
            root,
            &self.settings.hierarchy_predicate,
            &self.settings.rank_predicate,
        )?;
        let rows = self.gateway.execute(&query)?;
        *queries += 1;

        let mut found = Found::new();
        for row in &rows.rows {
            if let Some(taxon) = row.uri("taxon") {
                if taxon != root {
                    admit(&mut found, taxon, row, whitelist);
                }
            }
        }
        Ok(found)
    }

    fn walk(
        &self,
        root: &str,
        whitelist: &RankWhitelist,
        queries: &mut usize,
    ) -> Result<Found, TaxonomyError> {
        let mut found = Found::new();
        let mut visited: HashSet<String> = HashSet::from([root.to_string()]);
        let mut frontier = vec![root.to_string()];
        let mut depth = 0usize;

        while !frontier.is_empty() {
            depth += 1;
            let mut next = Vec::new();
            for chunk in frontier.chunks(self.settings.frontier_batch.max(1)) {
                self.cancel.check()?;
                let query = sparql::children_query(
                    chunk,
                    &self.settings.hierarchy_predicate,
                    &self.settings.rank_predicate,
                )?;
                let rows = self.gateway.execute(&query)?;
                *queries += 1;

                for row in &rows.rows {
                    let Some(child) = row.uri("child") else {
                        continue;
                    };
                    if child == root {
                        continue;
                    }
                    admit(&mut found, child, row, whitelist);
                    if visited.insert(child.to_string()) {
                        next.push(child.to_string());
                    }
                }
            }
            debug!(depth, frontier = next.len(), found = found.len(), "hierarchy level expanded");
            frontier = next;
        }
        Ok(found)
    }
}

/// Records `uri` when the row carries a whitelisted rank for it.
fn admit(found: &mut Found, uri: &str, row: &Row, whitelist: &RankWhitelist) {
    let rank = match row.uri("rank") {
        Some(rank) if whitelist.contains(rank) => rank,
        _ => return,
    };
    let entity = found.entry(uri.to_string()).or_insert_with(|| Entity {
        rank: Some(rank.to_string()),
        ..Entity::new(uri)
    });
    if entity.label.is_none() {
        entity.label = row.get("label").map(|label| label.value().to_string());
    }
}

fn path_unsupported(err: &TaxonomyError) -> bool {
    matches!(err.status(), Some(400 | 501)) && matches!(err, TaxonomyError::QueryStatus { .. })
}
