use std::collections::BTreeSet;
use std::io::Write;

use serde_json::{Map, Value, json};

use super::write_err;
use crate::domain::{Term, Triple};
use crate::error::TaxonomyError;
use crate::vocab;

fn node_id(term: &Term) -> Option<String> {
    match term {
        Term::Uri(uri) => Some(uri.clone()),
        Term::Blank(label) => Some(format!("_:{label}")),
        Term::Literal(_) => None,
    }
}

fn object_value(term: &Term) -> Value {
    match term {
        Term::Literal(lit) => {
            let mut value = Map::new();
            value.insert("@value".to_owned(), json!(lit.value));
            if let Some(lang) = &lit.language {
                value.insert("@language".to_owned(), json!(lang));
            } else if let Some(datatype) = &lit.datatype {
                value.insert("@type".to_owned(), json!(datatype));
            }
            Value::Object(value)
        }
        other => json!({ "@id": node_id(other) }),
    }
}

fn push(node: &mut Map<String, Value>, key: &str, value: Value) {
    if let Value::Array(values) = node
        .entry(key.to_owned())
        .or_insert_with(|| Value::Array(Vec::new()))
    {
        values.push(value);
    }
}

pub(super) fn to_json_ld(triples: &BTreeSet<Triple>) -> Value {
    let mut context = Map::new();
    for (prefix, namespace) in vocab::WELL_KNOWN_PREFIXES {
        context.insert((*prefix).to_owned(), json!(namespace));
    }

    let mut graph: Vec<Value> = Vec::new();
    let mut current: Option<(&Term, Map<String, Value>)> = None;
    for triple in triples {
        if current.as_ref().map(|(subject, _)| *subject != &triple.subject).unwrap_or(true) {
            if let Some((_, node)) = current.take() {
                graph.push(Value::Object(node));
            }
            let mut node = Map::new();
            node.insert("@id".to_owned(), json!(node_id(&triple.subject)));
            current = Some((&triple.subject, node));
        }
        if let Some((_, node)) = current.as_mut() {
            match &triple.object {
                Term::Uri(class) if triple.predicate == vocab::RDF_TYPE => {
                    push(node, "@type", json!(class));
                }
                object => push(node, &triple.predicate, object_value(object)),
            }
        }
    }
    if let Some((_, node)) = current {
        graph.push(Value::Object(node));
    }

    json!({
        "@context": context,
        "@graph": graph
    })
}

pub(super) fn write(triples: &BTreeSet<Triple>, out: &mut dyn Write) -> Result<(), TaxonomyError> {
    let document = to_json_ld(triples);
    serde_json::to_writer_pretty(&mut *out, &document)
        .map_err(|err| TaxonomyError::Serialization(err.to_string()))?;
    writeln!(out).map_err(write_err)
}
