use crate::error::TaxonomyError;
use crate::vocab;

pub const PROBE_QUERY: &str = "ASK {}";

pub fn iri(value: &str) -> Result<String, TaxonomyError> {
    let forbidden = |ch: char| matches!(ch, '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\') || ch <= ' ';
    if value.is_empty() || value.chars().any(forbidden) {
        return Err(TaxonomyError::InvalidIri(value.to_string()));
    }
    Ok(format!("<{value}>"))
}

fn values_block(var: &str, iris: &[String]) -> Result<String, TaxonomyError> {
    let terms = iris
        .iter()
        .map(|value| iri(value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(format!("VALUES ?{var} {{ {} }}", terms.join(" ")))
}

/// All entities reachable from `root` over one or more `hierarchy` hops, with their rank.
pub fn closure_query(root: &str, hierarchy: &str, rank: &str) -> Result<String, TaxonomyError> {
    Ok(format!(
        "SELECT DISTINCT ?taxon ?rank ?label WHERE {{\n  \
           ?taxon {hierarchy}+ {root} .\n  \
           ?taxon {rank} ?rank .\n  \
           OPTIONAL {{ ?taxon {label} ?label }}\n\
         }}",
        hierarchy = iri(hierarchy)?,
        root = iri(root)?,
        rank = iri(rank)?,
        label = iri(vocab::RDFS_LABEL)?,
    ))
}

/// Direct children of every IRI in `parents`, with their rank when they have one.
pub fn children_query(parents: &[String], hierarchy: &str, rank: &str) -> Result<String, TaxonomyError> {
    Ok(format!(
        "SELECT ?child ?parent ?rank ?label WHERE {{\n  \
           {values}\n  \
           ?child {hierarchy} ?parent .\n  \
           OPTIONAL {{ ?child {rank} ?rank }}\n  \
           OPTIONAL {{ ?child {label} ?label }}\n\
         }}",
        values = values_block("parent", parents)?,
        hierarchy = iri(hierarchy)?,
        rank = iri(rank)?,
        label = iri(vocab::RDFS_LABEL)?,
    ))
}

/// Every triple where one of `entities` is the subject or the object.
pub fn neighborhood_query(entities: &[String]) -> Result<String, TaxonomyError> {
    Ok(format!(
        "SELECT ?s ?p ?o WHERE {{\n  \
           {values}\n  \
           {{ ?e ?p ?o . BIND(?e AS ?s) }}\n  \
           UNION\n  \
           {{ ?s ?p ?e . BIND(?e AS ?o) }}\n\
         }}",
        values = values_block("e", entities)?,
    ))
}

pub fn rank_census_query(rank: &str) -> Result<String, TaxonomyError> {
    Ok(format!(
        "SELECT ?rank (COUNT(*) AS ?count) WHERE {{ ?taxon {rank} ?rank }}\n\
         GROUP BY ?rank\n\
         ORDER BY DESC(?count)",
        rank = iri(rank)?,
    ))
}

pub fn count_query() -> &'static str {
    "SELECT (COUNT(*) AS ?count) WHERE { ?s ?p ?o }"
}
