use std::collections::HashMap;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::GatewaySettings;
use crate::domain::{Literal, Term};
use crate::error::TaxonomyError;
use crate::sparql;

pub const SPARQL_RESULTS_JSON: &str = "application/sparql-results+json";
const MAX_GET_QUERY_BYTES: usize = 1800;

/// One result row: variable name to bound term. Unbound variables are absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    bindings: HashMap<String, Term>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, var: &str, term: Term) -> Self {
        self.bindings.insert(var.to_string(), term);
        self
    }

    pub fn get(&self, var: &str) -> Option<&Term> {
        self.bindings.get(var)
    }

    pub fn uri(&self, var: &str) -> Option<&str> {
        self.get(var).and_then(Term::as_uri)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub vars: Vec<String>,
    pub rows: Vec<Row>,
    pub boolean: Option<bool>,
}

impl RowSet {
    pub fn from_rows(vars: &[&str], rows: Vec<Row>) -> Self {
        Self {
            vars: vars.iter().map(|var| var.to_string()).collect(),
            rows,
            boolean: None,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub trait QueryGateway: Send + Sync {
    fn execute(&self, query: &str) -> Result<RowSet, TaxonomyError>;

    fn probe(&self) -> Result<(), TaxonomyError> {
        self.execute(sparql::PROBE_QUERY)
            .map(|_| ())
            .map_err(|err| TaxonomyError::Connectivity(err.to_string()))
    }
}

impl<G: QueryGateway + ?Sized> QueryGateway for &G {
    fn execute(&self, query: &str) -> Result<RowSet, TaxonomyError> {
        (**self).execute(query)
    }

    fn probe(&self) -> Result<(), TaxonomyError> {
        (**self).probe()
    }
}

#[derive(Debug, Deserialize)]
struct SparqlResponse {
    #[serde(default)]
    head: SparqlHead,
    #[serde(default)]
    results: Option<SparqlResults>,
    #[serde(default)]
    boolean: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct SparqlHead {
    #[serde(default)]
    vars: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SparqlResults {
    bindings: Vec<HashMap<String, RawTerm>>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawTerm {
    #[serde(rename = "uri")]
    Uri { value: String },
    #[serde(rename = "literal", alias = "typed-literal")]
    Literal {
        value: String,
        #[serde(rename = "xml:lang", default)]
        lang: Option<String>,
        #[serde(default)]
        datatype: Option<String>,
    },
    #[serde(rename = "bnode")]
    Blank { value: String },
}

impl From<RawTerm> for Term {
    fn from(raw: RawTerm) -> Self {
        match raw {
            RawTerm::Uri { value } => Term::Uri(value),
            RawTerm::Blank { value } => Term::Blank(value),
            RawTerm::Literal {
                value,
                lang,
                datatype,
            } => Term::Literal(Literal::new(value, lang, datatype)),
        }
    }
}

/// Parses a SPARQL 1.1 JSON results document.
pub fn parse_results(body: &str) -> Result<RowSet, TaxonomyError> {
    let response: SparqlResponse =
        serde_json::from_str(body).map_err(|err| TaxonomyError::QueryResponse(err.to_string()))?;
    if response.results.is_none() && response.boolean.is_none() {
        return Err(TaxonomyError::QueryResponse(
            "response has neither results nor boolean".to_string(),
        ));
    }
    let rows = response
        .results
        .map(|results| {
            results
                .bindings
                .into_iter()
                .map(|binding| Row {
                    bindings: binding
                        .into_iter()
                        .map(|(var, raw)| (var, Term::from(raw)))
                        .collect(),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(RowSet {
        vars: response.head.vars,
        rows,
        boolean: response.boolean,
    })
}

#[derive(Clone)]
pub struct SparqlHttpGateway {
    client: Client,
    endpoint: String,
    probe_timeout: Duration,
}

impl SparqlHttpGateway {
    pub fn new(settings: &GatewaySettings) -> Result<Self, TaxonomyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-tx/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TaxonomyError::QueryHttp(err.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static(SPARQL_RESULTS_JSON));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TaxonomyError::QueryHttp(err.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.sparql_url(),
            probe_timeout: settings.probe_timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn send(&self, query: &str, timeout: Option<Duration>) -> Result<Response, reqwest::Error> {
        let mut request = if query.len() <= MAX_GET_QUERY_BYTES {
            self.client.get(&self.endpoint).query(&[("query", query)])
        } else {
            self.client.post(&self.endpoint).form(&[("query", query)])
        };
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        request.send()
    }
}

impl QueryGateway for SparqlHttpGateway {
    fn execute(&self, query: &str) -> Result<RowSet, TaxonomyError> {
        debug!(endpoint = %self.endpoint, bytes = query.len(), "executing query");
        let response = self
            .send(query, None)
            .map_err(|err| TaxonomyError::QueryHttp(err.to_string()))?;
        let body = handle_status(response)?;
        parse_results(&body)
    }

    fn probe(&self) -> Result<(), TaxonomyError> {
        let response = self
            .send(sparql::PROBE_QUERY, Some(self.probe_timeout))
            .map_err(|err| TaxonomyError::Connectivity(format!("{}: {err}", self.endpoint)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(TaxonomyError::Connectivity(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankCount {
    pub rank: String,
    pub count: u64,
}

/// Number of taxa per rank value, most populated first.
pub fn rank_census<G: QueryGateway + ?Sized>(
    gateway: &G,
    rank_predicate: &str,
) -> Result<Vec<RankCount>, TaxonomyError> {
    let rows = gateway.execute(&sparql::rank_census_query(rank_predicate)?)?;
    let mut ranks = Vec::with_capacity(rows.len());
    for row in &rows.rows {
        let (Some(rank), Some(count)) = (row.get("rank"), row.get("count")) else {
            continue;
        };
        ranks.push(RankCount {
            rank: rank.value().to_string(),
            count: parse_count(count)?,
        });
    }
    Ok(ranks)
}

pub fn count_triples<G: QueryGateway + ?Sized>(gateway: &G) -> Result<u64, TaxonomyError> {
    let rows = gateway.execute(sparql::count_query())?;
    rows.rows
        .first()
        .and_then(|row| row.get("count"))
        .ok_or_else(|| TaxonomyError::QueryResponse("count query returned no rows".to_string()))
        .and_then(parse_count)
}

fn parse_count(term: &Term) -> Result<u64, TaxonomyError> {
    term.value()
        .parse()
        .map_err(|_| TaxonomyError::QueryResponse(format!("not a count: {}", term.value())))
}

fn handle_status(response: Response) -> Result<String, TaxonomyError> {
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .ok()
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("query failed").to_string());
        return Err(TaxonomyError::QueryStatus {
            status: status.as_u16(),
            message,
        });
    }
    response
        .text()
        .map_err(|err| TaxonomyError::QueryResponse(err.to_string()))
}
