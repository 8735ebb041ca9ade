use std::fs::File;
use std::io::Write;
use std::path::Path;

use assert_matches::assert_matches;
use flate2::Compression;
use flate2::write::GzEncoder;

use kira_taxonomy::domain::{InputFormat, Literal, Term, Triple};
use kira_taxonomy::error::TaxonomyError;
use kira_taxonomy::parser::TripleStream;
use kira_taxonomy::vocab;

fn fixture(name: &str) -> std::path::PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn rdfxml_fixture_streams_every_triple() {
    let mut stream = TripleStream::open(&fixture("mini_taxon.owl"), InputFormat::RdfXml).unwrap();
    let triples: Vec<Triple> = stream.by_ref().collect();

    assert_eq!(triples.len(), 17);
    assert_eq!(stream.stats().parsed, 17);
    assert_eq!(stream.stats().skipped, 0);
    assert!(stream.is_exhausted());

    let label = Triple::new(
        Term::uri("http://purl.obolibrary.org/obo/NCBITaxon_8801"),
        vocab::RDFS_LABEL,
        Term::Literal(Literal::plain("Struthio camelus")),
    );
    assert!(triples.contains(&label));
    let rank = Triple::new(
        Term::uri("http://purl.obolibrary.org/obo/NCBITaxon_8800"),
        vocab::NCBITAXON_HAS_RANK,
        Term::uri("http://purl.obolibrary.org/obo/NCBITaxon_genus"),
    );
    assert!(triples.contains(&rank));
}

#[test]
fn malformed_ntriples_lines_are_skipped() {
    let mut stream = TripleStream::open(&fixture("partial.nt"), InputFormat::NTriples).unwrap();
    let triples: Vec<Triple> = stream.by_ref().collect();

    assert_eq!(triples.len(), 2);
    assert_eq!(stream.stats().parsed, 2);
    assert_eq!(stream.stats().skipped, 2);
}

#[test]
fn gzip_input_is_decompressed() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("three.nt.gz");
    let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
    encoder
        .write_all(&std::fs::read(fixture("three.nt")).unwrap())
        .unwrap();
    encoder.finish().unwrap();

    assert_eq!(InputFormat::detect(&path), Some(InputFormat::NTriples));
    let stream = TripleStream::open(&path, InputFormat::NTriples).unwrap();
    assert_eq!(stream.count(), 3);
}

#[test]
fn turtle_input_is_supported() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("tiny.ttl");
    std::fs::write(
        &path,
        "@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#> .\n\
         <http://example.org/A> rdfs:label \"Aves\"@en ;\n    rdfs:subClassOf <http://example.org/R> .\n",
    )
    .unwrap();

    let triples: Vec<Triple> = TripleStream::open(&path, InputFormat::Turtle).unwrap().collect();
    assert_eq!(triples.len(), 2);
    assert!(triples.contains(&Triple::new(
        Term::uri("http://example.org/A"),
        vocab::RDFS_LABEL,
        Term::Literal(Literal::new("Aves", Some("en".to_string()), None)),
    )));
}

#[test]
fn missing_input_fails_before_parsing() {
    let result = TripleStream::open(Path::new("/nonexistent/ncbitaxon.owl"), InputFormat::RdfXml);
    assert_matches!(result, Err(TaxonomyError::InputNotFound(_)));
}

#[test]
fn xml_declared_as_ntriples_is_rejected() {
    let result = TripleStream::open(&fixture("mini_taxon.owl"), InputFormat::NTriples);
    assert_matches!(result, Err(TaxonomyError::Parse(_)));
}
