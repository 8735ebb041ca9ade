use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use assert_matches::assert_matches;

use kira_taxonomy::config::{GatewaySettings, ResolverSettings};
use kira_taxonomy::domain::{RankWhitelist, TaxonRef};
use kira_taxonomy::error::TaxonomyError;
use kira_taxonomy::gateway::{QueryGateway, SparqlHttpGateway, count_triples};
use kira_taxonomy::resolver::{DescendantResolver, ResolveStrategy};
use kira_taxonomy::sparql;

/// Serves exactly one canned response and returns the request line and body it received.
fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<(String, String)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut request_line = String::new();
        reader.read_line(&mut request_line).unwrap();
        let mut content_length = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((name, value)) = header.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
        }
        let mut request_body = vec![0u8; content_length];
        reader.read_exact(&mut request_body).unwrap();

        let mut stream = stream;
        write!(
            stream,
            "HTTP/1.1 {status}\r\nContent-Type: application/sparql-results+json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        )
        .unwrap();
        stream.flush().unwrap();
        (request_line, String::from_utf8(request_body).unwrap())
    });
    (base_url, handle)
}

fn settings(base_url: String) -> GatewaySettings {
    GatewaySettings {
        base_url,
        dataset: "ncbitaxon".to_string(),
        timeout: Duration::from_secs(10),
        connect_timeout: Duration::from_secs(2),
        probe_timeout: Duration::from_secs(2),
    }
}

#[test]
fn successful_response_is_parsed_into_rows() {
    let (base_url, server) = serve_once(
        "200 OK",
        r#"{"head":{"vars":["count"]},"results":{"bindings":[{"count":{"type":"literal","datatype":"http://www.w3.org/2001/XMLSchema#integer","value":"42"}}]}}"#,
    );
    let gateway = SparqlHttpGateway::new(&settings(base_url)).unwrap();
    assert_eq!(count_triples(&gateway).unwrap(), 42);

    let (request_line, _) = server.join().unwrap();
    assert!(request_line.starts_with("GET /ncbitaxon/sparql?query="));
}

#[test]
fn server_error_becomes_query_status() {
    let (base_url, server) = serve_once("500 Internal Server Error", "boom");
    let gateway = SparqlHttpGateway::new(&settings(base_url)).unwrap();

    let result = gateway.execute(sparql::count_query());
    assert_matches!(
        result,
        Err(TaxonomyError::QueryStatus { status: 500, ref message }) if message == "boom"
    );
    server.join().unwrap();
}

#[test]
fn resolve_against_failing_endpoint_returns_query_error() {
    let (base_url, server) = serve_once("500 Internal Server Error", "");
    let gateway = SparqlHttpGateway::new(&settings(base_url)).unwrap();
    let resolver_settings = ResolverSettings {
        strategy: ResolveStrategy::Auto,
        ..ResolverSettings::default()
    };
    let root: TaxonRef = "8825".parse().unwrap();

    let result = DescendantResolver::new(&gateway, &resolver_settings)
        .resolve(&root, &RankWhitelist::default());
    let err = result.unwrap_err();
    assert!(err.is_query_error());
    assert_eq!(err.status(), Some(500));
    server.join().unwrap();
}

#[test]
fn long_queries_are_posted_as_form() {
    let (base_url, server) = serve_once("200 OK", r#"{"head":{"vars":[]},"results":{"bindings":[]}}"#);
    let gateway = SparqlHttpGateway::new(&settings(base_url)).unwrap();
    let entities: Vec<String> = (0..200)
        .map(|id| format!("http://purl.obolibrary.org/obo/NCBITaxon_{id}"))
        .collect();
    let query = sparql::neighborhood_query(&entities).unwrap();

    let rows = gateway.execute(&query).unwrap();
    assert!(rows.is_empty());
    let (request_line, body) = server.join().unwrap();
    assert!(request_line.starts_with("POST /ncbitaxon/sparql"));
    assert!(body.starts_with("query="));
}

#[test]
fn unreachable_endpoint_fails_the_probe() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let gateway = SparqlHttpGateway::new(&settings(base_url)).unwrap();
    assert_matches!(gateway.probe(), Err(TaxonomyError::Connectivity(_)));
}
