use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;

use crate::domain::{Term, Triple};
use crate::error::TaxonomyError;
use crate::fs_util::{io_error, write_atomic};
use crate::vocab;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GraphSummary {
    pub total_triples: u64,
    pub classes: u64,
    pub properties: u64,
    pub individuals: u64,
}

impl GraphSummary {
    pub fn record(&mut self, triple: &Triple) {
        self.total_triples += 1;
        if triple.predicate != vocab::RDF_TYPE {
            return;
        }
        if let Term::Uri(object) = &triple.object {
            match object.as_str() {
                vocab::OWL_CLASS => self.classes += 1,
                vocab::OWL_OBJECT_PROPERTY | vocab::OWL_DATATYPE_PROPERTY => self.properties += 1,
                vocab::OWL_NAMED_INDIVIDUAL => self.individuals += 1,
                _ => {}
            }
        }
    }

    pub fn from_triples<'a, I>(triples: I) -> Self
    where
        I: IntoIterator<Item = &'a Triple>,
    {
        let mut summary = Self::default();
        for triple in triples {
            summary.record(triple);
        }
        summary
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingReport {
    pub name: String,
    pub summary: GraphSummary,
    pub processing_time: Duration,
    pub generated_at: String,
}

impl ProcessingReport {
    pub fn new(name: impl Into<String>, summary: GraphSummary, processing_time: Duration) -> Self {
        Self {
            name: name.into(),
            summary,
            processing_time,
            generated_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("OWL Processing Summary for {}\n", self.name));
        out.push_str(&"=".repeat(50));
        out.push_str("\n\n");
        out.push_str(&format!(
            "Total triples: {}\n",
            group_thousands(self.summary.total_triples)
        ));
        out.push_str(&format!("Classes: {}\n", group_thousands(self.summary.classes)));
        out.push_str(&format!(
            "Properties: {}\n",
            group_thousands(self.summary.properties)
        ));
        out.push_str(&format!(
            "Individuals: {}\n",
            group_thousands(self.summary.individuals)
        ));
        out.push_str(&format!(
            "Processing time: {:.2} seconds\n",
            self.processing_time.as_secs_f64()
        ));
        out.push_str(&format!("Generated at: {}\n", self.generated_at));
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<(), TaxonomyError> {
        let text = self.render();
        write_atomic(path, |writer| {
            writer
                .write_all(text.as_bytes())
                .map_err(|err| io_error("write summary", err))
        })
    }
}

pub fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_grouping() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1_000), "1,000");
        assert_eq!(group_thousands(2_641_873), "2,641,873");
    }

    #[test]
    fn counts_owl_declarations() {
        let triples = vec![
            Triple::new(Term::uri("A"), vocab::RDF_TYPE, Term::uri(vocab::OWL_CLASS)),
            Triple::new(Term::uri("A"), vocab::RDFS_LABEL, Term::literal("Foo")),
            Triple::new(Term::uri("p"), vocab::RDF_TYPE, Term::uri(vocab::OWL_OBJECT_PROPERTY)),
            Triple::new(Term::uri("i"), vocab::RDF_TYPE, Term::uri(vocab::OWL_NAMED_INDIVIDUAL)),
        ];
        let summary = GraphSummary::from_triples(&triples);
        assert_eq!(summary.total_triples, 4);
        assert_eq!(summary.classes, 1);
        assert_eq!(summary.properties, 1);
        assert_eq!(summary.individuals, 1);
    }
}
