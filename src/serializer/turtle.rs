use std::collections::BTreeSet;
use std::io::Write;
use std::sync::LazyLock;

use regex::Regex;

use super::{split_known_prefix, write_err};
use crate::domain::{Term, Triple, escape_literal};
use crate::error::TaxonomyError;
use crate::vocab;

// Conservative subset of PN_LOCAL; anything else stays a full IRI.
static LOCAL_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_](?:[A-Za-z0-9_.\-]*[A-Za-z0-9_\-])?$").expect("static regex")
});

fn iri(value: &str) -> String {
    match split_known_prefix(value) {
        Some((prefix, local)) if LOCAL_NAME.is_match(local) => format!("{prefix}:{local}"),
        _ => format!("<{value}>"),
    }
}

fn term(value: &Term) -> String {
    match value {
        Term::Uri(uri) => iri(uri),
        Term::Blank(id) => format!("_:{id}"),
        Term::Literal(lit) => {
            let mut out = format!("\"{}\"", escape_literal(&lit.value));
            if let Some(lang) = &lit.language {
                out.push('@');
                out.push_str(lang);
            } else if let Some(datatype) = &lit.datatype {
                out.push_str("^^");
                out.push_str(&iri(datatype));
            }
            out
        }
    }
}

fn predicate(value: &str) -> String {
    if value == vocab::RDF_TYPE {
        "a".to_string()
    } else {
        iri(value)
    }
}

pub(super) fn write(triples: &BTreeSet<Triple>, out: &mut dyn Write) -> Result<(), TaxonomyError> {
    for (prefix, namespace) in vocab::WELL_KNOWN_PREFIXES {
        writeln!(out, "@prefix {prefix}: <{namespace}> .").map_err(write_err)?;
    }

    let mut subject: Option<&Term> = None;
    let mut current_predicate: Option<&str> = None;
    for triple in triples {
        if subject == Some(&triple.subject) {
            if current_predicate == Some(triple.predicate.as_str()) {
                write!(out, " ,\n        {}", term(&triple.object)).map_err(write_err)?;
            } else {
                write!(
                    out,
                    " ;\n    {} {}",
                    predicate(&triple.predicate),
                    term(&triple.object)
                )
                .map_err(write_err)?;
            }
        } else {
            if subject.is_some() {
                writeln!(out, " .").map_err(write_err)?;
            }
            write!(
                out,
                "\n{}\n    {} {}",
                term(&triple.subject),
                predicate(&triple.predicate),
                term(&triple.object)
            )
            .map_err(write_err)?;
            subject = Some(&triple.subject);
        }
        current_predicate = Some(triple.predicate.as_str());
    }
    if subject.is_some() {
        writeln!(out, " .").map_err(write_err)?;
    }
    Ok(())
}
