use std::fs;
use std::time::Instant;

use camino::Utf8Path;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::app::{ProgressEvent, ProgressSink};
use crate::domain::{Entity, Term, Triple};
use crate::error::TaxonomyError;
use crate::report::GraphSummary;
use crate::vocab;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS triples (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        predicate TEXT NOT NULL,
        object TEXT NOT NULL,
        context TEXT,
        UNIQUE(subject, predicate, object)
    );
    CREATE TABLE IF NOT EXISTS entities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        uri TEXT UNIQUE NOT NULL,
        type TEXT,
        label TEXT,
        description TEXT
    );
";

const INDEXES: &[(&str, &str)] = &[
    ("idx_subject", "subject"),
    ("idx_predicate", "predicate"),
    ("idx_object", "object"),
];

const INSERT_TRIPLE: &str =
    "INSERT OR IGNORE INTO triples (subject, predicate, object, context) VALUES (?1, ?2, ?3, ?4)";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub total_triples: u64,
    pub unique_subjects: u64,
    pub unique_predicates: u64,
    pub records_read: u64,
    pub inserted: u64,
    pub batches: u64,
}

pub struct TripleStore {
    conn: Connection,
    location: String,
    batch_size: usize,
    context: Option<String>,
}

impl TripleStore {
    pub fn open(path: &Utf8Path, batch_size: usize) -> Result<Self, TaxonomyError> {
        if let Some(parent) = path.parent() {
            if !parent.as_str().is_empty() {
                fs::create_dir_all(parent.as_std_path())
                    .map_err(|err| TaxonomyError::Filesystem(err.to_string()))?;
            }
        }
        let conn = Connection::open(path.as_std_path())?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        debug!(path = %path, journal_mode = %mode, "opened triple store");
        Self::init(conn, path.to_string(), batch_size)
    }

    pub fn open_in_memory(batch_size: usize) -> Result<Self, TaxonomyError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn, ":memory:".to_string(), batch_size)
    }

    fn init(conn: Connection, location: String, batch_size: usize) -> Result<Self, TaxonomyError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            location,
            batch_size: batch_size.max(1),
            context: None,
        })
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Bulk-loads `triples`, then rebuilds the column indexes.
    pub fn append<I>(&mut self, triples: I, sink: &dyn ProgressSink) -> Result<LoadStats, TaxonomyError>
    where
        I: IntoIterator<Item = Triple>,
    {
        let started = Instant::now();
        let mut stats = LoadStats::default();
        self.drop_indexes()?;

        let mut batch = Vec::with_capacity(self.batch_size);
        for triple in triples {
            batch.push(triple);
            if batch.len() >= self.batch_size {
                self.flush(&mut batch, &mut stats, started, sink)?;
            }
        }
        if !batch.is_empty() {
            self.flush(&mut batch, &mut stats, started, sink)?;
        }

        sink.event(ProgressEvent {
            message: "phase=Index; building subject/predicate/object indexes".to_string(),
            elapsed: Some(started.elapsed()),
        });
        self.build_indexes()?;

        let counts = self.counts()?;
        stats.total_triples = counts.total_triples;
        stats.unique_subjects = counts.unique_subjects;
        stats.unique_predicates = counts.unique_predicates;
        info!(
            store = %self.location,
            total = stats.total_triples,
            inserted = stats.inserted,
            batches = stats.batches,
            "load complete"
        );
        Ok(stats)
    }

    fn flush(
        &mut self,
        batch: &mut Vec<Triple>,
        stats: &mut LoadStats,
        started: Instant,
        sink: &dyn ProgressSink,
    ) -> Result<(), TaxonomyError> {
        let inserted = self.commit_batch(batch)?;
        stats.inserted += inserted as u64;
        stats.records_read += batch.len() as u64;
        stats.batches += 1;
        batch.clear();
        sink.event(ProgressEvent {
            message: format!(
                "phase=Store; committed batch {} ({} records)",
                stats.batches, stats.records_read
            ),
            elapsed: Some(started.elapsed()),
        });
        Ok(())
    }

    /// Inserts one batch in a single transaction and returns the number of new rows.
    pub fn commit_batch(&mut self, batch: &[Triple]) -> Result<usize, TaxonomyError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| TaxonomyError::StorageWrite(format!("begin batch: {err}")))?;
        let mut inserted = 0usize;
        {
            let mut insert = tx
                .prepare_cached(INSERT_TRIPLE)
                .map_err(|err| TaxonomyError::StorageWrite(format!("prepare insert: {err}")))?;
            for triple in batch {
                inserted += insert
                    .execute(params![
                        triple.subject.to_column(),
                        triple.predicate,
                        triple.object.to_column(),
                        self.context,
                    ])
                    .map_err(|err| TaxonomyError::StorageWrite(format!("insert triple: {err}")))?;
            }
        }
        tx.commit()
            .map_err(|err| TaxonomyError::StorageWrite(format!("commit batch: {err}")))?;
        Ok(inserted)
    }

    pub fn drop_indexes(&self) -> Result<(), TaxonomyError> {
        for (name, _) in INDEXES {
            self.conn
                .execute_batch(&format!("DROP INDEX IF EXISTS {name}"))?;
        }
        Ok(())
    }

    pub fn build_indexes(&self) -> Result<(), TaxonomyError> {
        for (name, column) in INDEXES {
            self.conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS {name} ON triples({column})"
            ))?;
        }
        Ok(())
    }

    pub fn counts(&self) -> Result<LoadStats, TaxonomyError> {
        let count = |sql: &str| -> Result<u64, TaxonomyError> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            Ok(value as u64)
        };
        Ok(LoadStats {
            total_triples: count("SELECT COUNT(*) FROM triples")?,
            unique_subjects: count("SELECT COUNT(DISTINCT subject) FROM triples")?,
            unique_predicates: count("SELECT COUNT(DISTINCT predicate) FROM triples")?,
            ..LoadStats::default()
        })
    }

    pub fn summary(&self) -> Result<GraphSummary, TaxonomyError> {
        let typed = |objects: &[&str]| -> Result<u64, TaxonomyError> {
            let mut total = 0u64;
            for object in objects {
                let value: i64 = self.conn.query_row(
                    "SELECT COUNT(*) FROM triples WHERE predicate = ?1 AND object = ?2",
                    params![vocab::RDF_TYPE, object],
                    |row| row.get(0),
                )?;
                total += value as u64;
            }
            Ok(total)
        };
        let total: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM triples", [], |row| row.get(0))?;
        Ok(GraphSummary {
            total_triples: total as u64,
            classes: typed(&[vocab::OWL_CLASS])?,
            properties: typed(&[vocab::OWL_OBJECT_PROPERTY, vocab::OWL_DATATYPE_PROPERTY])?,
            individuals: typed(&[vocab::OWL_NAMED_INDIVIDUAL])?,
        })
    }

    pub fn entity(&self, uri: &str, rank_predicate: &str) -> Result<Option<Entity>, TaxonomyError> {
        let mut stmt = self
            .conn
            .prepare("SELECT predicate, object FROM triples WHERE subject = ?1 ORDER BY id")?;
        let mut rows = stmt.query(params![uri])?;
        let mut entity = None::<Entity>;
        while let Some(row) = rows.next()? {
            let predicate: String = row.get(0)?;
            let object: String = row.get(1)?;
            let entity = entity.get_or_insert_with(|| Entity::new(uri));
            let value = || Term::from_column(&object).map(|term| term.value().to_string());
            if predicate == vocab::RDF_TYPE && entity.entity_type.is_none() {
                entity.entity_type = Some(value()?);
            } else if predicate == vocab::RDFS_LABEL && entity.label.is_none() {
                entity.label = Some(value()?);
            } else if predicate == vocab::RDFS_COMMENT && entity.description.is_none() {
                entity.description = Some(value()?);
            } else if predicate == rank_predicate && entity.rank.is_none() {
                entity.rank = Some(value()?);
            }
        }
        Ok(entity)
    }

    /// Every stored triple in which `uri` is the subject or the object.
    pub fn neighborhood(&self, uri: &str) -> Result<Vec<Triple>, TaxonomyError> {
        let mut stmt = self.conn.prepare(
            "SELECT subject, predicate, object FROM triples WHERE subject = ?1
             UNION
             SELECT subject, predicate, object FROM triples WHERE object = ?1",
        )?;
        let mut rows = stmt.query(params![uri])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(decode_row(row.get(0)?, row.get(1)?, row.get(2)?)?);
        }
        Ok(out)
    }

    pub fn contains(&self, triple: &Triple) -> Result<bool, TaxonomyError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM triples WHERE subject = ?1 AND predicate = ?2 AND object = ?3",
                params![
                    triple.subject.to_column(),
                    triple.predicate,
                    triple.object.to_column()
                ],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Streams every triple in insertion order.
    pub fn for_each_triple<F>(&self, mut f: F) -> Result<(), TaxonomyError>
    where
        F: FnMut(Triple) -> Result<(), TaxonomyError>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT subject, predicate, object FROM triples ORDER BY id")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            f(decode_row(row.get(0)?, row.get(1)?, row.get(2)?)?)?;
        }
        Ok(())
    }

    /// Rebuilds the `entities` table from the triples. Returns the number of rows written.
    pub fn refresh_entities(&mut self) -> Result<usize, TaxonomyError> {
        let tx = self
            .conn
            .transaction()
            .map_err(|err| TaxonomyError::StorageWrite(format!("begin entity refresh: {err}")))?;
        let mut written = 0usize;
        {
            tx.execute("DELETE FROM entities", [])?;
            let mut select = tx.prepare(
                "SELECT subject, predicate, object FROM triples
                 WHERE predicate IN (?1, ?2, ?3) ORDER BY subject, id",
            )?;
            let mut insert = tx.prepare(
                "INSERT OR REPLACE INTO entities (uri, type, label, description) VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut rows = select.query(params![
                vocab::RDF_TYPE,
                vocab::RDFS_LABEL,
                vocab::RDFS_COMMENT
            ])?;
            let mut current: Option<Entity> = None;
            while let Some(row) = rows.next()? {
                let subject: String = row.get(0)?;
                let predicate: String = row.get(1)?;
                let object: String = row.get(2)?;
                if current.as_ref().map(|e| e.uri != subject).unwrap_or(false) {
                    if let Some(done) = current.take() {
                        insert.execute(params![done.uri, done.entity_type, done.label, done.description])?;
                        written += 1;
                    }
                }
                let entity = current.get_or_insert_with(|| Entity::new(subject));
                let value = Term::from_column(&object)?.value().to_string();
                match predicate.as_str() {
                    vocab::RDF_TYPE if entity.entity_type.is_none() => entity.entity_type = Some(value),
                    vocab::RDFS_LABEL if entity.label.is_none() => entity.label = Some(value),
                    vocab::RDFS_COMMENT if entity.description.is_none() => {
                        entity.description = Some(value)
                    }
                    _ => {}
                }
            }
            if let Some(done) = current.take() {
                insert.execute(params![done.uri, done.entity_type, done.label, done.description])?;
                written += 1;
            }
        }
        tx.commit()
            .map_err(|err| TaxonomyError::StorageWrite(format!("commit entity refresh: {err}")))?;
        Ok(written)
    }

    pub fn entity_row_count(&self) -> Result<u64, TaxonomyError> {
        let value: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM entities", [], |row| row.get(0))?;
        Ok(value as u64)
    }

    pub fn index_names(&self) -> Result<Vec<String>, TaxonomyError> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'triples' AND name LIKE 'idx_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }
}

fn decode_row(subject: String, predicate: String, object: String) -> Result<Triple, TaxonomyError> {
    Ok(Triple {
        subject: Term::from_column(&subject)?,
        predicate,
        object: Term::from_column(&object)?,
    })
}
