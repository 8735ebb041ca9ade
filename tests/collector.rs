use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use assert_matches::assert_matches;

use kira_taxonomy::collector::{Neighborhood, NeighborhoodCollector};
use kira_taxonomy::config::CollectorSettings;
use kira_taxonomy::domain::{Term, Triple};
use kira_taxonomy::error::TaxonomyError;
use kira_taxonomy::gateway::{QueryGateway, Row, RowSet};
use kira_taxonomy::vocab;

fn iri(local: &str) -> String {
    format!("http://example.org/taxon/{local}")
}

/// Answers neighborhood queries from a fixed triple list.
struct MockGraph {
    triples: Vec<Triple>,
    fail_on: Option<String>,
    calls: AtomicUsize,
}

impl MockGraph {
    fn new() -> Self {
        let triples = vec![
            Triple::new(Term::uri(iri("A")), vocab::RDFS_SUBCLASS_OF, Term::uri(iri("R"))),
            Triple::new(Term::uri(iri("A")), vocab::RDFS_LABEL, Term::literal("Alpha")),
            Triple::new(Term::uri(iri("B")), vocab::RDFS_SUBCLASS_OF, Term::uri(iri("A"))),
            Triple::new(Term::uri(iri("B")), vocab::RDFS_LABEL, Term::literal("Beta")),
            Triple::new(Term::uri(iri("C")), vocab::RDFS_SUBCLASS_OF, Term::uri(iri("B"))),
            Triple::new(Term::uri(iri("D")), vocab::RDFS_SUBCLASS_OF, Term::uri(iri("C"))),
            Triple::new(Term::uri(iri("E")), vocab::RDFS_SUBCLASS_OF, Term::uri(iri("D"))),
        ];
        Self {
            triples,
            fail_on: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing_on(mut self, local: &str) -> Self {
        self.fail_on = Some(iri(local));
        self
    }
}

impl QueryGateway for MockGraph {
    fn execute(&self, query: &str) -> Result<RowSet, TaxonomyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(fail) = &self.fail_on {
            if query.contains(&format!("<{fail}>")) {
                return Err(TaxonomyError::QueryStatus {
                    status: 503,
                    message: "unavailable".to_string(),
                });
            }
        }
        let rows = self
            .triples
            .iter()
            .filter(|t| {
                [&t.subject, &t.object].iter().any(|term| match term.as_uri() {
                    Some(uri) => query.contains(&format!("<{uri}>")),
                    None => false,
                })
            })
            .map(|t| {
                Row::new()
                    .with("s", t.subject.clone())
                    .with("p", Term::uri(&t.predicate))
                    .with("o", t.object.clone())
            })
            .collect();
        Ok(RowSet::from_rows(&["s", "p", "o"], rows))
    }
}

fn settings(batch_size: usize, workers: usize) -> CollectorSettings {
    CollectorSettings { batch_size, workers }
}

#[test]
fn shared_edges_are_collected_once() {
    let gateway = MockGraph::new();
    let settings = settings(1, 2);
    let result = NeighborhoodCollector::new(&gateway, &settings)
        .collect(&[iri("A"), iri("B"), iri("A")])
        .unwrap();

    // A: 2 own triples + B's edge to A; B: 2 own triples + C's edge to B.
    assert_eq!(result.triples.len(), 5);
    assert_eq!(result.processed.len(), 2);
    assert_eq!(result.queries, 2);
}

#[test]
fn processed_entities_are_not_fetched_again() {
    let gateway = MockGraph::new();
    let settings = settings(10, 4);
    let collector = NeighborhoodCollector::new(&gateway, &settings);
    let mut acc = Neighborhood::default();

    assert_eq!(collector.collect_into(&mut acc, &[iri("A")]).unwrap(), 1);
    assert_eq!(collector.collect_into(&mut acc, &[iri("A"), iri("B")]).unwrap(), 1);
    assert_eq!(collector.collect_into(&mut acc, &[iri("B")]).unwrap(), 0);
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 2);
    assert_eq!(acc.processed.len(), 2);
}

#[test]
fn entities_are_batched_across_workers() {
    let gateway = MockGraph::new();
    let settings = settings(2, 3);
    let entities: Vec<String> = ["A", "B", "C", "D", "E"].iter().map(|l| iri(l)).collect();
    let result = NeighborhoodCollector::new(&gateway, &settings)
        .collect(&entities)
        .unwrap();

    assert_eq!(result.queries, 3);
    assert_eq!(result.processed.len(), 5);
    assert_eq!(result.triples.len(), 7);
}

#[test]
fn first_failure_is_returned() {
    let gateway = MockGraph::new().failing_on("C");
    let settings = settings(1, 2);
    let entities: Vec<String> = ["A", "B", "C", "D"].iter().map(|l| iri(l)).collect();
    let result = NeighborhoodCollector::new(&gateway, &settings).collect(&entities);

    assert_matches!(result, Err(TaxonomyError::QueryStatus { status: 503, .. }));
}

#[test]
fn empty_input_issues_no_queries() {
    let gateway = MockGraph::new();
    let settings = settings(25, 4);
    let result = NeighborhoodCollector::new(&gateway, &settings)
        .collect(&[])
        .unwrap();

    assert!(result.is_empty());
    assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn zero_batch_size_is_treated_as_one() {
    let gateway = MockGraph::new();
    let settings = settings(0, 0);
    let result = NeighborhoodCollector::new(&gateway, &settings)
        .collect(&[iri("A"), iri("B")])
        .unwrap();

    assert_eq!(result.queries, 2);
    assert_eq!(result.processed.len(), 2);
}

#[test]
fn blank_nodes_from_different_responses_stay_distinct() {
    let restriction = |target: &str| {
        Triple::new(
            Term::Blank("b0".to_string()),
            "http://www.w3.org/2002/07/owl#annotatedSource",
            Term::uri(iri(target)),
        )
    };
    let gateway = MockGraph {
        triples: vec![restriction("A"), restriction("B")],
        fail_on: None,
        calls: AtomicUsize::new(0),
    };
    let settings = settings(1, 2);
    let collector = NeighborhoodCollector::new(&gateway, &settings);
    let mut acc = Neighborhood::default();
    collector.collect_into(&mut acc, &[iri("A"), iri("B")]).unwrap();
    collector.collect_into(&mut acc, &[iri("C")]).unwrap();

    assert_eq!(acc.triples.len(), 2);
    let subjects: BTreeSet<&Term> = acc.triples.iter().map(|t| &t.subject).collect();
    assert_eq!(subjects.len(), 2);
    assert!(subjects.iter().all(|s| matches!(s, Term::Blank(_))));
}
