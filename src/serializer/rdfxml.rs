use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;

use super::{split_known_prefix, write_err};
use crate::domain::{Term, Triple};
use crate::error::TaxonomyError;
use crate::vocab;

static NC_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[_\p{L}\p{Nl}][-._\p{L}\p{Nl}\p{Nd}\p{Mn}\p{Mc}\p{Pc}\x{B7}]*$")
        .expect("static regex")
});

/// Namespace prefixes for every predicate, allocated before the root element is opened.
struct Namespaces {
    by_iri: BTreeMap<String, String>,
}

impl Namespaces {
    fn collect(triples: &BTreeSet<Triple>) -> Result<Self, TaxonomyError> {
        let mut by_iri: BTreeMap<String, String> = vocab::WELL_KNOWN_PREFIXES
            .iter()
            .map(|(prefix, namespace)| (namespace.to_string(), prefix.to_string()))
            .collect();
        let mut generated = 0usize;
        for triple in triples {
            let (namespace, _) = split_predicate(&triple.predicate)?;
            if !by_iri.contains_key(namespace) {
                by_iri.insert(namespace.to_string(), format!("ns{generated}"));
                generated += 1;
            }
        }
        Ok(Self { by_iri })
    }

    fn qname(&self, predicate: &str) -> Result<String, TaxonomyError> {
        if let Some((prefix, local)) = split_known_prefix(predicate) {
            if NC_NAME.is_match(local) {
                return Ok(format!("{prefix}:{local}"));
            }
        }
        let (namespace, local) = split_predicate(predicate)?;
        let prefix = self.by_iri.get(namespace).ok_or_else(|| {
            TaxonomyError::Serialization(format!("no namespace declared for {predicate}"))
        })?;
        Ok(format!("{prefix}:{local}"))
    }
}

/// Splits after the last `#` or `/`; the remainder must be an XML name.
fn split_predicate(predicate: &str) -> Result<(&str, &str), TaxonomyError> {
    let split = predicate
        .rfind(['#', '/'])
        .map(|idx| predicate.split_at(idx + 1))
        .filter(|(_, local)| NC_NAME.is_match(local));
    split.ok_or_else(|| {
        TaxonomyError::Serialization(format!(
            "predicate {predicate} cannot be written as an RDF/XML element"
        ))
    })
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\r' => out.push_str("&#13;"),
            other => out.push(other),
        }
    }
    out
}

/// Blank node labels are renamed to `b<n>` so every `rdf:nodeID` is a valid NCName.
#[derive(Default)]
struct NodeIds {
    ids: HashMap<String, String>,
}

impl NodeIds {
    fn get(&mut self, label: &str) -> String {
        let next = self.ids.len();
        self.ids
            .entry(label.to_string())
            .or_insert_with(|| format!("b{next}"))
            .clone()
    }
}

pub(super) fn write(triples: &BTreeSet<Triple>, out: &mut dyn Write) -> Result<(), TaxonomyError> {
    let namespaces = Namespaces::collect(triples)?;
    let mut node_ids = NodeIds::default();

    writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>").map_err(write_err)?;
    write!(out, "<rdf:RDF").map_err(write_err)?;
    for (namespace, prefix) in &namespaces.by_iri {
        write!(out, "\n    xmlns:{prefix}=\"{}\"", escape(namespace)).map_err(write_err)?;
    }
    writeln!(out, ">").map_err(write_err)?;

    let mut subject: Option<&Term> = None;
    for triple in triples {
        if subject != Some(&triple.subject) {
            if subject.is_some() {
                writeln!(out, "  </rdf:Description>").map_err(write_err)?;
            }
            let about = match &triple.subject {
                Term::Uri(uri) => format!("rdf:about=\"{}\"", escape(uri)),
                Term::Blank(label) => format!("rdf:nodeID=\"{}\"", node_ids.get(label)),
                Term::Literal(_) => {
                    return Err(TaxonomyError::Serialization(
                        "literal in subject position".to_string(),
                    ));
                }
            };
            writeln!(out, "  <rdf:Description {about}>").map_err(write_err)?;
            subject = Some(&triple.subject);
        }

        let element = namespaces.qname(&triple.predicate)?;
        match &triple.object {
            Term::Uri(uri) => writeln!(out, "    <{element} rdf:resource=\"{}\"/>", escape(uri)),
            Term::Blank(label) => {
                writeln!(out, "    <{element} rdf:nodeID=\"{}\"/>", node_ids.get(label))
            }
            Term::Literal(lit) => {
                let attr = match (&lit.language, &lit.datatype) {
                    (Some(lang), _) => format!(" xml:lang=\"{}\"", escape(lang)),
                    (None, Some(datatype)) => format!(" rdf:datatype=\"{}\"", escape(datatype)),
                    (None, None) => String::new(),
                };
                writeln!(out, "    <{element}{attr}>{}</{element}>", escape(&lit.value))
            }
        }
        .map_err(write_err)?;
    }
    if subject.is_some() {
        writeln!(out, "  </rdf:Description>").map_err(write_err)?;
    }
    writeln!(out, "</rdf:RDF>").map_err(write_err)?;
    Ok(())
}
