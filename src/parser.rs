use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::BufRead;
use std::path::Path;

use serde::Serialize;
use sha2::{Digest, Sha256};
use sophia::api::source::{StreamError, TripleSource};
use sophia::api::term::{Term as RdfTerm, TermKind};
use sophia::api::triple::Triple as RdfTriple;
use tracing::{debug, warn};

use crate::domain::{InputFormat, Literal, Term, Triple};
use crate::error::TaxonomyError;
use crate::fs_util::open_input;

/// Read or syntax errors in a row, with no triple in between, before a source is abandoned.
pub const MAX_CONSECUTIVE_ERRORS: usize = 16;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ParseStats {
    pub parsed: u64,
    pub skipped: u64,
}

trait RecordSource {
    /// Appends the next decoded triples to `out`. `Ok(false)` means end of input.
    fn pull(&mut self, out: &mut VecDeque<Triple>, stats: &mut ParseStats) -> Result<bool, String>;
}

struct SophiaSource<S> {
    inner: S,
}

impl<S: TripleSource> RecordSource for SophiaSource<S> {
    fn pull(&mut self, out: &mut VecDeque<Triple>, stats: &mut ParseStats) -> Result<bool, String> {
        let result = self
            .inner
            .try_for_some_triple(|t| -> Result<(), Infallible> {
                match convert_triple(&t) {
                    Some(triple) => out.push_back(triple),
                    None => {
                        stats.skipped += 1;
                        debug!("skipping triple with unsupported terms");
                    }
                }
                Ok(())
            });
        match result {
            Ok(more) => Ok(more),
            Err(StreamError::SourceError(err)) => Err(err.to_string()),
            Err(StreamError::SinkError(never)) => match never {},
        }
    }
}

/// N-Triples are read one line at a time so a bad line costs exactly one record.
struct LineSource {
    reader: Box<dyn BufRead>,
    line: Vec<u8>,
    line_no: u64,
}

impl RecordSource for LineSource {
    fn pull(&mut self, out: &mut VecDeque<Triple>, stats: &mut ParseStats) -> Result<bool, String> {
        self.line.clear();
        let read = self
            .reader
            .read_until(b'\n', &mut self.line)
            .map_err(|err| format!("line {}: {err}", self.line_no + 1))?;
        if read == 0 {
            return Ok(false);
        }
        self.line_no += 1;

        let Ok(text) = std::str::from_utf8(&self.line) else {
            stats.skipped += 1;
            warn!(line = self.line_no, "skipping N-Triples record that is not valid UTF-8");
            return Ok(true);
        };
        let text = text.trim();
        if text.is_empty() || text.starts_with('#') {
            return Ok(true);
        }

        let mut decoded = Vec::new();
        let mut source = sophia::turtle::parser::nt::parse_str(text);
        let result = source.try_for_each_triple(|t| -> Result<(), Infallible> {
            decoded.push(convert_triple(&t));
            Ok(())
        });
        match result {
            Ok(()) => {
                for triple in decoded {
                    match triple {
                        Some(triple) => out.push_back(triple),
                        None => stats.skipped += 1,
                    }
                }
            }
            Err(err) => {
                stats.skipped += 1;
                warn!(line = self.line_no, "skipping malformed N-Triples record: {err}");
            }
        }
        Ok(true)
    }
}

/// Lazy, non-restartable triple sequence over one input.
///
/// Exhausting the iterator drops the underlying parser and reader.
pub struct TripleStream {
    source: Option<Box<dyn RecordSource>>,
    pending: VecDeque<Triple>,
    stats: ParseStats,
    consecutive_errors: usize,
    origin: String,
    blank_scope: Option<String>,
}

impl std::fmt::Debug for TripleStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TripleStream")
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .field("consecutive_errors", &self.consecutive_errors)
            .field("origin", &self.origin)
            .field("blank_scope", &self.blank_scope)
            .finish_non_exhaustive()
    }
}

impl TripleStream {
    /// Blank node labels get a prefix derived from the file's path and size.
    pub fn open(path: &Path, format: InputFormat) -> Result<Self, TaxonomyError> {
        let reader = open_input(path)?;
        let scope = blank_scope_for(path);
        Ok(Self::from_reader(reader, format, &path.display().to_string())?.with_blank_scope(scope))
    }

    pub fn from_reader(
        mut reader: Box<dyn BufRead>,
        format: InputFormat,
        origin: &str,
    ) -> Result<Self, TaxonomyError> {
        sniff_header(reader.as_mut(), format, origin)?;

        let source: Box<dyn RecordSource> = match format {
            InputFormat::RdfXml => Box::new(SophiaSource {
                inner: sophia::xml::parser::parse_bufread(reader),
            }),
            InputFormat::Turtle => Box::new(SophiaSource {
                inner: sophia::turtle::parser::turtle::parse_bufread(reader),
            }),
            InputFormat::NTriples => Box::new(LineSource {
                reader,
                line: Vec::new(),
                line_no: 0,
            }),
        };

        Ok(Self {
            source: Some(source),
            pending: VecDeque::new(),
            stats: ParseStats::default(),
            consecutive_errors: 0,
            origin: origin.to_string(),
            blank_scope: None,
        })
    }

    pub fn with_blank_scope(mut self, scope: impl Into<String>) -> Self {
        self.blank_scope = Some(scope.into());
        self
    }

    pub fn stats(&self) -> ParseStats {
        self.stats
    }

    pub fn is_exhausted(&self) -> bool {
        self.source.is_none() && self.pending.is_empty()
    }
}

impl Iterator for TripleStream {
    type Item = Triple;

    fn next(&mut self) -> Option<Triple> {
        loop {
            if let Some(triple) = self.pending.pop_front() {
                self.stats.parsed += 1;
                return Some(match &self.blank_scope {
                    Some(scope) => Triple {
                        subject: triple.subject.scoped(scope),
                        predicate: triple.predicate,
                        object: triple.object.scoped(scope),
                    },
                    None => triple,
                });
            }
            let source = self.source.as_mut()?;
            match source.pull(&mut self.pending, &mut self.stats) {
                Ok(true) => {
                    if !self.pending.is_empty() {
                        self.consecutive_errors = 0;
                    }
                }
                Ok(false) => {
                    debug!(origin = %self.origin, "input exhausted");
                    self.source = None;
                }
                Err(message) => {
                    self.stats.skipped += 1;
                    self.consecutive_errors += 1;
                    warn!(origin = %self.origin, "skipping malformed record: {message}");
                    if self.consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        warn!(
                            origin = %self.origin,
                            "parser did not recover after {} errors; stopping",
                            self.consecutive_errors
                        );
                        self.source = None;
                    }
                }
            }
        }
    }
}

fn blank_scope_for(path: &Path) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let size = std::fs::metadata(path).map(|meta| meta.len()).unwrap_or(0);
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string_lossy().as_bytes());
    hasher.update(size.to_le_bytes());
    let digest = hasher.finalize();
    let hex: String = digest[..6].iter().map(|byte| format!("{byte:02x}")).collect();
    format!("f{hex}")
}

fn sniff_header(
    reader: &mut dyn BufRead,
    format: InputFormat,
    origin: &str,
) -> Result<(), TaxonomyError> {
    let head = reader.fill_buf().map_err(|err| TaxonomyError::InputRead {
        path: origin.to_string(),
        message: err.to_string(),
    })?;
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start_matches('\u{feff}').trim_start();
    let looks_like_xml = text.starts_with("<?xml") || text.starts_with("<rdf:RDF");

    match format {
        InputFormat::RdfXml if !text.starts_with('<') => Err(TaxonomyError::Parse(format!(
            "{origin} is not recognised as RDF/XML"
        ))),
        InputFormat::NTriples | InputFormat::Turtle if looks_like_xml => Err(
            TaxonomyError::Parse(format!("{origin} looks like XML, not {format}")),
        ),
        _ => Ok(()),
    }
}

fn convert_triple<T: RdfTriple>(t: &T) -> Option<Triple> {
    let subject = match convert_term(t.s())? {
        Term::Literal(_) => return None,
        node => node,
    };
    let predicate = t.p().iri()?.as_str().to_string();
    let object = convert_term(t.o())?;
    Some(Triple {
        subject,
        predicate,
        object,
    })
}

fn convert_term<U: RdfTerm>(term: U) -> Option<Term> {
    match term.kind() {
        TermKind::Iri => term.iri().map(|iri| Term::Uri(iri.as_str().to_string())),
        TermKind::BlankNode => term
            .bnode_id()
            .map(|id| Term::Blank(id.as_str().to_string())),
        TermKind::Literal => {
            let value = term.lexical_form()?.to_string();
            let language = term.language_tag().map(|tag| tag.as_str().to_string());
            let datatype = term.datatype().map(|dt| dt.as_str().to_string());
            Some(Term::Literal(Literal::new(value, language, datatype)))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn stream(text: &str, format: InputFormat) -> TripleStream {
        TripleStream::from_reader(Box::new(Cursor::new(text.as_bytes().to_vec())), format, "test")
            .unwrap()
    }

    #[test]
    fn ntriples_skip_malformed_lines() {
        let text = "<http://e.org/a> <http://e.org/p> <http://e.org/b> .\n\
                    this is not a triple\n\
                    # comment\n\
                    <http://e.org/a> <http://e.org/q> \"x\" .\n";
        let mut triples = stream(text, InputFormat::NTriples);
        let collected: Vec<Triple> = triples.by_ref().collect();
        assert_eq!(collected.len(), 2);
        assert_eq!(triples.stats().parsed, 2);
        assert_eq!(triples.stats().skipped, 1);
        assert!(triples.is_exhausted());
    }

    #[test]
    fn invalid_utf8_lines_do_not_end_the_stream() {
        let mut bytes = Vec::new();
        for _ in 0..20 {
            bytes.extend_from_slice(b"<http://e.org/\xff> <http://e.org/p> \"\xfe\" .\n");
        }
        bytes.extend_from_slice(b"<http://e.org/a> <http://e.org/p> <http://e.org/b> .\n");
        let mut triples =
            TripleStream::from_reader(Box::new(Cursor::new(bytes)), InputFormat::NTriples, "test")
                .unwrap();
        let collected: Vec<Triple> = triples.by_ref().collect();
        assert_eq!(collected.len(), 1);
        assert_eq!(collected[0].subject, Term::uri("http://e.org/a"));
        assert_eq!(triples.stats().skipped, 20);
    }

    #[test]
    fn blank_scope_prefixes_every_blank_node() {
        let text = "_:r <http://e.org/p> _:s .\n<http://e.org/a> <http://e.org/q> _:r .\n";
        let triples: Vec<Triple> = stream(text, InputFormat::NTriples)
            .with_blank_scope("f1")
            .collect();
        assert_eq!(triples[0].subject, Term::Blank("f1_r".to_string()));
        assert_eq!(triples[0].object, Term::Blank("f1_s".to_string()));
        assert_eq!(triples[1].object, Term::Blank("f1_r".to_string()));
    }

    #[test]
    fn rdfxml_header_is_checked() {
        let result = TripleStream::from_reader(
            Box::new(Cursor::new(b"not xml at all".to_vec())),
            InputFormat::RdfXml,
            "broken.owl",
        );
        assert!(matches!(result, Err(TaxonomyError::Parse(_))));
    }
}
