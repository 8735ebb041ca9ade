use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::TaxonomyError;
use crate::vocab;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Literal {
    pub value: String,
    pub language: Option<String>,
    pub datatype: Option<String>,
}

impl Literal {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            language: None,
            datatype: None,
        }
    }

    /// Builds a literal, folding `xsd:string` and `rdf:langString` into the plain forms.
    pub fn new(value: impl Into<String>, language: Option<String>, datatype: Option<String>) -> Self {
        let language = language.filter(|tag| !tag.is_empty());
        let datatype = if language.is_some() {
            None
        } else {
            datatype.filter(|dt| dt != vocab::XSD_STRING && dt != vocab::RDF_LANG_STRING)
        };
        Self {
            value: value.into(),
            language,
            datatype,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Term {
    Uri(String),
    Blank(String),
    Literal(Literal),
}

impl Term {
    pub fn uri(value: impl Into<String>) -> Self {
        Term::Uri(value.into())
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal(Literal::plain(value))
    }

    pub fn as_uri(&self) -> Option<&str> {
        match self {
            Term::Uri(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal(_))
    }

    /// Prefixes a blank node label with `scope`; other terms pass through.
    pub fn scoped(self, scope: &str) -> Self {
        match self {
            Term::Blank(label) => Term::Blank(format!("{scope}_{label}")),
            other => other,
        }
    }

    pub fn value(&self) -> &str {
        match self {
            Term::Uri(value) | Term::Blank(value) => value,
            Term::Literal(lit) => &lit.value,
        }
    }

    /// IRIs are stored bare, blank nodes as `_:id` and literals in N-Triples syntax.
    pub fn to_column(&self) -> String {
        match self {
            Term::Uri(value) => value.clone(),
            Term::Blank(id) => format!("_:{id}"),
            Term::Literal(lit) => literal_to_ntriples(lit),
        }
    }

    pub fn from_column(raw: &str) -> Result<Self, TaxonomyError> {
        if raw.starts_with('"') {
            return parse_ntriples_literal(raw).map(Term::Literal);
        }
        if let Some(id) = raw.strip_prefix("_:") {
            return Ok(Term::Blank(id.to_string()));
        }
        if raw.is_empty() {
            return Err(TaxonomyError::Storage("empty term in store".to_string()));
        }
        Ok(Term::Uri(raw.to_string()))
    }

    pub fn to_ntriples(&self) -> String {
        match self {
            Term::Uri(value) => format!("<{value}>"),
            Term::Blank(id) => format!("_:{id}"),
            Term::Literal(lit) => literal_to_ntriples(lit),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_ntriples())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Triple {
    pub subject: Term,
    pub predicate: String,
    pub object: Term,
}

impl Triple {
    pub fn new(subject: Term, predicate: impl Into<String>, object: Term) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
        }
    }

    pub fn mentions(&self, uri: &str) -> bool {
        self.subject.as_uri() == Some(uri) || self.object.as_uri() == Some(uri)
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}> {} .", self.subject, self.predicate, self.object)
    }
}

/// Read-only projection of the triples whose subject is `uri`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub uri: String,
    pub entity_type: Option<String>,
    pub label: Option<String>,
    pub description: Option<String>,
    pub rank: Option<String>,
}

impl Entity {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            entity_type: None,
            label: None,
            description: None,
            rank: None,
        }
    }
}

static NUMERIC_TAXON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:NCBITaxon[:_])?(\d+)$").expect("static regex"));
static ABSOLUTE_IRI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:https?://|urn:)\S+$").expect("static regex"));
static RANK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z_]*$").expect("static regex"));

/// Root taxon of an extraction, always held as a full IRI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonRef(String);

impl TaxonRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short label for file names: `NCBITaxon_8825` or the IRI's last segment.
    pub fn local_name(&self) -> &str {
        self.0.rsplit(['#', '/']).next().unwrap_or(&self.0)
    }
}

impl fmt::Display for TaxonRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonRef {
    type Err = TaxonomyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if let Some(caps) = NUMERIC_TAXON.captures(trimmed) {
            return Ok(Self(format!("{}{}", vocab::NCBITAXON_PREFIX, &caps[1])));
        }
        if ABSOLUTE_IRI.is_match(trimmed) {
            return Ok(Self(trimmed.to_string()));
        }
        Err(TaxonomyError::InvalidTaxon(value.to_string()))
    }
}

/// Ordered set of rank IRIs that may appear in an extraction result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankWhitelist {
    ranks: Vec<String>,
}

pub const DEFAULT_RANKS: &[&str] = &[
    "superclass",
    "class",
    "subclass",
    "superorder",
    "order",
    "suborder",
    "superfamily",
    "family",
    "subfamily",
    "genus",
    "species",
];

impl RankWhitelist {
    /// Accepts full rank IRIs or NCBI rank names (`genus`), dropping repeats.
    pub fn parse<I, S>(entries: I) -> Result<Self, TaxonomyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut ranks: Vec<String> = Vec::new();
        for entry in entries {
            let entry = entry.as_ref().trim();
            let iri = if RANK_NAME.is_match(entry) {
                format!("{}{}", vocab::NCBITAXON_PREFIX, entry)
            } else if ABSOLUTE_IRI.is_match(entry) {
                entry.to_string()
            } else {
                return Err(TaxonomyError::InvalidRank(entry.to_string()));
            };
            if !ranks.contains(&iri) {
                ranks.push(iri);
            }
        }
        if ranks.is_empty() {
            return Err(TaxonomyError::InvalidRank("rank whitelist is empty".to_string()));
        }
        Ok(Self { ranks })
    }

    pub fn contains(&self, rank: &str) -> bool {
        self.ranks.iter().any(|candidate| candidate == rank)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ranks.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ranks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }
}

impl Default for RankWhitelist {
    fn default() -> Self {
        Self {
            ranks: DEFAULT_RANKS
                .iter()
                .map(|name| format!("{}{}", vocab::NCBITAXON_PREFIX, name))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    #[value(name = "rdfxml")]
    RdfXml,
    #[value(name = "ntriples")]
    NTriples,
    Turtle,
}

impl InputFormat {
    /// Guesses the serialization from the file name, looking through a `.gz` suffix.
    pub fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_lowercase();
        let name = name.strip_suffix(".gz").unwrap_or(&name);
        let ext = name.rsplit_once('.').map(|(_, ext)| ext)?;
        match ext {
            "owl" | "rdf" | "xml" => Some(InputFormat::RdfXml),
            "nt" | "ntriples" => Some(InputFormat::NTriples),
            "ttl" | "turtle" => Some(InputFormat::Turtle),
            _ => None,
        }
    }
}

impl fmt::Display for InputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputFormat::RdfXml => write!(f, "rdfxml"),
            InputFormat::NTriples => write!(f, "ntriples"),
            InputFormat::Turtle => write!(f, "turtle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum GraphFormat {
    Turtle,
    #[value(name = "ntriples")]
    NTriples,
    #[value(name = "rdfxml")]
    RdfXml,
    #[value(name = "jsonld")]
    JsonLd,
}

impl GraphFormat {
    pub fn extension(self) -> &'static str {
        match self {
            GraphFormat::Turtle => "ttl",
            GraphFormat::NTriples => "nt",
            GraphFormat::RdfXml => "owl",
            GraphFormat::JsonLd => "jsonld",
        }
    }
}

impl fmt::Display for GraphFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphFormat::Turtle => write!(f, "turtle"),
            GraphFormat::NTriples => write!(f, "ntriples"),
            GraphFormat::RdfXml => write!(f, "rdfxml"),
            GraphFormat::JsonLd => write!(f, "jsonld"),
        }
    }
}

pub fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

fn literal_to_ntriples(lit: &Literal) -> String {
    let mut out = format!("\"{}\"", escape_literal(&lit.value));
    if let Some(lang) = &lit.language {
        out.push('@');
        out.push_str(lang);
    } else if let Some(datatype) = &lit.datatype {
        out.push_str("^^<");
        out.push_str(datatype);
        out.push('>');
    }
    out
}

fn parse_ntriples_literal(raw: &str) -> Result<Literal, TaxonomyError> {
    let invalid = || TaxonomyError::Storage(format!("malformed literal column: {raw}"));
    let mut value = String::new();
    let mut chars = raw.char_indices().skip(1);
    let mut close = None;
    while let Some((idx, ch)) = chars.next() {
        match ch {
            '"' => {
                close = Some(idx);
                break;
            }
            '\\' => match chars.next().map(|(_, escaped)| escaped) {
                Some('n') => value.push('\n'),
                Some('r') => value.push('\r'),
                Some('t') => value.push('\t'),
                Some('"') => value.push('"'),
                Some('\\') => value.push('\\'),
                _ => return Err(invalid()),
            },
            other => value.push(other),
        }
    }
    let close = close.ok_or_else(invalid)?;
    let suffix = &raw[close + 1..];
    if suffix.is_empty() {
        return Ok(Literal::plain(value));
    }
    if let Some(lang) = suffix.strip_prefix('@') {
        return Ok(Literal::new(value, Some(lang.to_string()), None));
    }
    let datatype = suffix
        .strip_prefix("^^<")
        .and_then(|rest| rest.strip_suffix('>'))
        .ok_or_else(invalid)?;
    Ok(Literal::new(value, None, Some(datatype.to_string())))
}
