use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use kira_taxonomy::admin::{DatasetAdmin, DatasetKind, UploadReceipt};
use kira_taxonomy::app::{App, ExportTarget, ExtractOptions};
use kira_taxonomy::config::{Config, ConfigLoader, ResolvedConfig, StoreEntry};
use kira_taxonomy::domain::{GraphFormat, InputFormat, RankWhitelist, TaxonRef, Term, Triple};
use kira_taxonomy::error::TaxonomyError;
use kira_taxonomy::gateway::{QueryGateway, Row, RowSet};
use kira_taxonomy::output::JsonOutput;
use kira_taxonomy::parser::TripleStream;
use kira_taxonomy::sparql;
use kira_taxonomy::vocab;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn taxon(id: &str) -> String {
    format!("{}{id}", vocab::NCBITAXON_PREFIX)
}

fn config(root: &Path) -> ResolvedConfig {
    ConfigLoader::resolve_config(Config {
        store: Some(StoreEntry {
            data_root: Some(root.to_string_lossy().into_owned()),
            batch_size: Some(5),
        }),
        ..Config::default()
    })
    .unwrap()
}

fn database(root: &Path) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(root.join("datasets/test.db")).unwrap()
}

fn target(dir: &Path, stem: &str, formats: &[GraphFormat]) -> ExportTarget {
    ExportTarget {
        out_dir: dir.to_path_buf(),
        stem: stem.to_string(),
        formats: formats.to_vec(),
    }
}

/// Endpoint holding genus 8800 and species 8801 below infraclass 8825.
#[derive(Default)]
struct MockEndpoint {
    down: bool,
    queries: Mutex<Vec<String>>,
}

impl MockEndpoint {
    fn triples() -> Vec<Triple> {
        vec![
            Triple::new(Term::uri(taxon("8800")), vocab::RDF_TYPE, Term::uri(vocab::OWL_CLASS)),
            Triple::new(Term::uri(taxon("8800")), vocab::RDFS_SUBCLASS_OF, Term::uri(taxon("8825"))),
            Triple::new(Term::uri(taxon("8800")), vocab::NCBITAXON_HAS_RANK, Term::uri(taxon("genus"))),
            Triple::new(Term::uri(taxon("8801")), vocab::RDF_TYPE, Term::uri(vocab::OWL_CLASS)),
            Triple::new(Term::uri(taxon("8801")), vocab::RDFS_SUBCLASS_OF, Term::uri(taxon("8800"))),
            Triple::new(Term::uri(taxon("8801")), vocab::NCBITAXON_HAS_RANK, Term::uri(taxon("species"))),
            Triple::new(Term::uri(taxon("8801")), vocab::RDFS_LABEL, Term::literal("Struthio camelus")),
        ]
    }
}

impl QueryGateway for MockEndpoint {
    fn execute(&self, query: &str) -> Result<RowSet, TaxonomyError> {
        self.queries.lock().unwrap().push(query.to_string());
        if self.down {
            return Err(TaxonomyError::QueryHttp("connection refused".to_string()));
        }
        if query == sparql::PROBE_QUERY {
            return Ok(RowSet {
                boolean: Some(true),
                ..RowSet::default()
            });
        }
        if query == sparql::count_query() {
            return Ok(RowSet::from_rows(
                &["count"],
                vec![Row::new().with("count", Term::literal("7"))],
            ));
        }
        if query.contains(">+ ") {
            let rows = vec![
                Row::new()
                    .with("taxon", Term::uri(taxon("8800")))
                    .with("rank", Term::uri(taxon("genus"))),
                Row::new()
                    .with("taxon", Term::uri(taxon("8801")))
                    .with("rank", Term::uri(taxon("species"))),
            ];
            return Ok(RowSet::from_rows(&["taxon", "rank", "label"], rows));
        }
        let rows = Self::triples()
            .into_iter()
            .filter(|t| {
                [&t.subject, &t.object]
                    .iter()
                    .filter_map(|term| term.as_uri())
                    .any(|uri| query.contains(&format!("<{uri}>")))
            })
            .map(|t| {
                Row::new()
                    .with("s", t.subject)
                    .with("p", Term::uri(t.predicate))
                    .with("o", t.object)
            })
            .collect();
        Ok(RowSet::from_rows(&["s", "p", "o"], rows))
    }
}

#[derive(Default)]
struct MockAdmin {
    created: Mutex<Vec<(String, DatasetKind)>>,
}

impl DatasetAdmin for MockAdmin {
    fn create_dataset(&self, name: &str, kind: DatasetKind) -> Result<(), TaxonomyError> {
        self.created.lock().unwrap().push((name.to_string(), kind));
        Ok(())
    }

    fn upload(&self, dataset: &str, file: &Path, graph: &str) -> Result<UploadReceipt, TaxonomyError> {
        let bytes = std::fs::metadata(file)
            .map_err(|_| TaxonomyError::InputNotFound(file.to_path_buf()))?
            .len();
        Ok(UploadReceipt {
            dataset: dataset.to_string(),
            graph: graph.to_string(),
            bytes,
        })
    }
}

#[test]
fn load_counts_the_fixture_and_is_idempotent() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let db = database(temp.path());

    let first = app
        .load(&fixture("mini_taxon.owl"), None, &db, true, &JsonOutput)
        .unwrap();
    assert_eq!(first.format, InputFormat::RdfXml);
    assert_eq!(first.stats.total_triples, 17);
    assert_eq!(first.entities, Some(5));

    let second = app
        .load(&fixture("mini_taxon.owl"), None, &db, false, &JsonOutput)
        .unwrap();
    assert_eq!(second.stats.total_triples, 17);
    assert_eq!(second.stats.inserted, 0);

    let stats = app.stats(&db).unwrap();
    assert_eq!(stats.summary.classes, 4);
    assert_eq!(stats.indexes.len(), 3);

    let genus = app.entity(&db, &taxon("8800")).unwrap().unwrap();
    assert_eq!(genus.label.as_deref(), Some("Struthio"));
    assert_eq!(genus.rank, Some(taxon("genus")));
}

#[test]
fn unparseable_input_is_reported() {
    let temp = tempfile::tempdir().unwrap();
    let garbage = temp.path().join("garbage.nt");
    std::fs::write(&garbage, "not a triple\nneither is this\n").unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let db = database(temp.path());

    assert_matches!(
        app.load(&garbage, None, &db, false, &JsonOutput),
        Err(TaxonomyError::Parse(_))
    );
    assert_matches!(
        app.load(&temp.path().join("missing.owl"), None, &db, false, &JsonOutput),
        Err(TaxonomyError::InputNotFound(_))
    );
    assert_matches!(
        app.load(&temp.path().join("taxonomy.bin"), None, &db, false, &JsonOutput),
        Err(TaxonomyError::InvalidFormat(_))
    );
}

#[test]
fn stats_on_a_missing_dataset_fail() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    assert_matches!(
        app.stats(&database(temp.path())),
        Err(TaxonomyError::InputNotFound(_))
    );
}

#[test]
fn convert_writes_graphs_and_summary() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let out = temp.path().join("out");
    let result = app
        .convert(
            &fixture("mini_taxon.owl"),
            None,
            &target(&out, "mini", &[GraphFormat::Turtle, GraphFormat::NTriples]),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.summary.total_triples, 17);
    assert_eq!(result.summary.classes, 4);
    assert_eq!(result.export.files.len(), 2);

    let reparsed: BTreeSet<Triple> =
        TripleStream::open(&out.join("mini.ttl"), InputFormat::Turtle).unwrap().collect();
    let original: BTreeSet<Triple> =
        TripleStream::open(&fixture("mini_taxon.owl"), InputFormat::RdfXml).unwrap().collect();
    assert_eq!(reparsed, original);

    let summary = std::fs::read_to_string(&result.summary_file).unwrap();
    assert!(summary.starts_with("OWL Processing Summary for mini"));
    assert!(summary.contains("Total triples: 17"));
}

#[test]
fn export_reads_back_the_loaded_dataset() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let db = database(temp.path());
    app.load(&fixture("three.nt"), None, &db, false, &JsonOutput).unwrap();

    let out = temp.path().join("export");
    let result = app
        .export(&db, &target(&out, "three", &[GraphFormat::NTriples]), &JsonOutput)
        .unwrap();
    assert_eq!(result.summary.total_triples, 3);
    assert_eq!(result.export.triples, 3);

    let text = std::fs::read_to_string(out.join("three.nt")).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn extract_writes_the_subgraph_with_its_header() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let root: TaxonRef = "8825".parse().unwrap();
    let out = temp.path().join("extract");

    let result = app
        .extract(
            &root,
            &ExtractOptions::default(),
            &target(&out, "neornithes", &[GraphFormat::NTriples, GraphFormat::RdfXml]),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.entities, 2);
    assert_eq!(result.summary.total_triples, 7);
    assert_eq!(result.export.triples, 10);

    let written: BTreeSet<Triple> =
        TripleStream::open(&out.join("neornithes.owl"), InputFormat::RdfXml).unwrap().collect();
    assert!(written.contains(&Triple::new(
        Term::uri("http://example.org/ncbitaxon-extract"),
        vocab::RDF_TYPE,
        Term::uri(vocab::OWL_ONTOLOGY),
    )));
    assert!(written.iter().all(|t| t.subject.as_uri() != Some(root.as_str())));
    assert!(out.join("neornithes_summary.txt").exists());
}

#[test]
fn extract_honors_a_narrower_whitelist() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let options = ExtractOptions {
        ranks: Some(RankWhitelist::parse(["species"]).unwrap()),
        include_root: false,
    };

    let result = app
        .extract(
            &"8825".parse().unwrap(),
            &options,
            &target(temp.path(), "species", &[GraphFormat::NTriples]),
            &JsonOutput,
        )
        .unwrap();
    assert_eq!(result.entities, 1);
    // Only the species' own triples; the genus is never collected.
    assert_eq!(result.summary.total_triples, 4);
}

#[test]
fn extract_fails_fast_when_the_endpoint_is_down() {
    let temp = tempfile::tempdir().unwrap();
    let gateway = MockEndpoint {
        down: true,
        ..MockEndpoint::default()
    };
    let app = App::new(config(temp.path()), gateway);
    let out = temp.path().join("never");

    let result = app.extract(
        &"8825".parse().unwrap(),
        &ExtractOptions::default(),
        &target(&out, "never", &[GraphFormat::Turtle]),
        &JsonOutput,
    );
    assert_matches!(result, Err(TaxonomyError::Connectivity(_)));
    assert!(!out.join("never.ttl").exists());
}

#[test]
fn upload_creates_the_dataset_and_reports_the_count() {
    let temp = tempfile::tempdir().unwrap();
    let app = App::new(config(temp.path()), MockEndpoint::default());
    let admin = MockAdmin::default();

    let result = app
        .upload(
            &admin,
            &fixture("three.nt"),
            "http://example.org/graph",
            Some(DatasetKind::Tdb2),
            &JsonOutput,
        )
        .unwrap();

    assert_eq!(result.receipt.dataset, "ncbitaxon");
    assert_eq!(result.receipt.graph, "http://example.org/graph");
    assert!(result.receipt.bytes > 0);
    assert_eq!(result.triples, Some(7));
    assert_eq!(
        admin.created.lock().unwrap().as_slice(),
        &[("ncbitaxon".to_string(), DatasetKind::Tdb2)]
    );
}

#[test]
fn upload_survives_a_failing_count() {
    let temp = tempfile::tempdir().unwrap();
    let gateway = MockEndpoint {
        down: true,
        ..MockEndpoint::default()
    };
    let app = App::new(config(temp.path()), gateway);

    let result = app
        .upload(&MockAdmin::default(), &fixture("three.nt"), "default", None, &JsonOutput)
        .unwrap();
    assert_eq!(result.triples, None);
    assert_eq!(result.created, None);
}
