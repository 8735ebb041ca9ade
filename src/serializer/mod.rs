mod jsonld;
mod ntriples;
mod rdfxml;
mod turtle;

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::info;

use crate::domain::{GraphFormat, Literal, Term, Triple};
use crate::error::TaxonomyError;
use crate::fs_util::write_atomic;
use crate::vocab;

/// Metadata written as an `owl:Ontology` node at the top of every export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OntologyHeader {
    pub uri: String,
    pub label: String,
    pub comment: String,
}

impl Default for OntologyHeader {
    fn default() -> Self {
        Self {
            uri: "http://example.org/ncbitaxon-extract".to_string(),
            label: "NCBI Taxonomy extract".to_string(),
            comment: "Extracted taxonomy subgraph from NCBITaxon".to_string(),
        }
    }
}

impl OntologyHeader {
    pub fn triples(&self) -> [Triple; 3] {
        let subject = Term::uri(&self.uri);
        [
            Triple::new(subject.clone(), vocab::RDF_TYPE, Term::uri(vocab::OWL_ONTOLOGY)),
            Triple::new(
                subject.clone(),
                vocab::RDFS_LABEL,
                Term::Literal(Literal::plain(&self.label)),
            ),
            Triple::new(
                subject,
                vocab::RDFS_COMMENT,
                Term::Literal(Literal::plain(&self.comment)),
            ),
        ]
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExportReport {
    pub files: Vec<PathBuf>,
    pub triples: usize,
    pub subjects: usize,
}

pub fn write_graph(
    format: GraphFormat,
    triples: &BTreeSet<Triple>,
    out: &mut dyn Write,
) -> Result<(), TaxonomyError> {
    match format {
        GraphFormat::NTriples => ntriples::write(triples, out),
        GraphFormat::Turtle => turtle::write(triples, out),
        GraphFormat::RdfXml => rdfxml::write(triples, out),
        GraphFormat::JsonLd => jsonld::write(triples, out),
    }
}

/// Writes `triples`, plus the header node when given, once per format as
/// `<out_dir>/<stem>.<ext>`.
pub fn export<I>(
    triples: I,
    header: Option<&OntologyHeader>,
    formats: &[GraphFormat],
    out_dir: &Path,
    stem: &str,
) -> Result<ExportReport, TaxonomyError>
where
    I: IntoIterator<Item = Triple>,
{
    let mut graph: BTreeSet<Triple> = triples.into_iter().collect();
    if let Some(header) = header {
        graph.extend(header.triples());
    }

    let mut report = ExportReport {
        triples: graph.len(),
        subjects: graph
            .iter()
            .map(|triple| &triple.subject)
            .collect::<HashSet<_>>()
            .len(),
        ..ExportReport::default()
    };

    let mut seen = HashSet::new();
    for format in formats.iter().copied().filter(|format| seen.insert(*format)) {
        let path = out_dir.join(format!("{stem}.{}", format.extension()));
        write_atomic(&path, |out| write_graph(format, &graph, out))?;
        info!(path = %path.display(), triples = report.triples, "graph written");
        report.files.push(path);
    }
    Ok(report)
}

/// Longest well-known namespace that `iri` starts with.
fn split_known_prefix(iri: &str) -> Option<(&'static str, &str)> {
    vocab::WELL_KNOWN_PREFIXES
        .iter()
        .filter(|(_, namespace)| iri.starts_with(namespace))
        .max_by_key(|(_, namespace)| namespace.len())
        .map(|(prefix, namespace)| (*prefix, &iri[namespace.len()..]))
}

fn write_err(err: std::io::Error) -> TaxonomyError {
    TaxonomyError::Serialization(err.to_string())
}
