use std::fmt;
use std::fs::File;
use std::path::Path;

use clap::ValueEnum;
use flate2::read::MultiGzDecoder;
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::GatewaySettings;
use crate::domain::InputFormat;
use crate::error::TaxonomyError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DatasetKind {
    #[default]
    Mem,
    Tdb2,
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatasetKind::Mem => write!(f, "mem"),
            DatasetKind::Tdb2 => write!(f, "tdb2"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub dataset: String,
    pub graph: String,
    pub bytes: u64,
}

pub trait DatasetAdmin: Send + Sync {
    fn create_dataset(&self, name: &str, kind: DatasetKind) -> Result<(), TaxonomyError>;
    fn upload(&self, dataset: &str, file: &Path, graph: &str) -> Result<UploadReceipt, TaxonomyError>;
}

/// Dataset administration over the Fuseki HTTP admin protocol.
#[derive(Clone)]
pub struct FusekiAdminClient {
    client: Client,
    base_url: String,
}

impl FusekiAdminClient {
    pub fn new(settings: &GatewaySettings) -> Result<Self, TaxonomyError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-tx/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| TaxonomyError::AdminHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout)
            .connect_timeout(settings.connect_timeout)
            .build()
            .map_err(|err| TaxonomyError::AdminHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl DatasetAdmin for FusekiAdminClient {
    fn create_dataset(&self, name: &str, kind: DatasetKind) -> Result<(), TaxonomyError> {
        let url = format!("{}/$/datasets", self.base_url);
        let kind = kind.to_string();
        let response = self
            .client
            .post(&url)
            .form(&[("dbName", name), ("dbType", kind.as_str())])
            .send()
            .map_err(|err| TaxonomyError::AdminHttp(err.to_string()))?;
        handle_status(response)?;
        info!(dataset = name, kind = %kind, "dataset created");
        Ok(())
    }

    fn upload(&self, dataset: &str, file: &Path, graph: &str) -> Result<UploadReceipt, TaxonomyError> {
        if !file.exists() {
            return Err(TaxonomyError::InputNotFound(file.to_path_buf()));
        }
        let bytes = file
            .metadata()
            .map(|meta| meta.len())
            .map_err(|err| TaxonomyError::InputRead {
                path: file.display().to_string(),
                message: err.to_string(),
            })?;
        let part = upload_part(file)?
            .mime_str(content_type(file))
            .map_err(|err| TaxonomyError::AdminHttp(err.to_string()))?;
        let form = Form::new().text("graph", graph.to_string()).part("file", part);

        let url = format!("{}/{}/data", self.base_url, dataset);
        info!(dataset, file = %file.display(), bytes, "uploading");
        let response = self
            .client
            .post(&url)
            .multipart(form)
            .send()
            .map_err(|err| TaxonomyError::AdminHttp(err.to_string()))?;
        handle_status(response)?;
        Ok(UploadReceipt {
            dataset: dataset.to_string(),
            graph: graph.to_string(),
            bytes,
        })
    }
}

/// Gzip input is decompressed on the fly and sent under its inner file name.
fn upload_part(file: &Path) -> Result<Part, TaxonomyError> {
    let read_err = |err: std::io::Error| TaxonomyError::InputRead {
        path: file.display().to_string(),
        message: err.to_string(),
    };
    match upload_name(file) {
        Some(inner) => {
            let decoder = MultiGzDecoder::new(File::open(file).map_err(read_err)?);
            Ok(Part::reader(decoder).file_name(inner))
        }
        None => Part::file(file).map_err(read_err),
    }
}

fn upload_name(file: &Path) -> Option<String> {
    let gzip = file
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));
    if !gzip {
        return None;
    }
    file.file_stem().map(|stem| stem.to_string_lossy().into_owned())
}

fn content_type(file: &Path) -> &'static str {
    match InputFormat::detect(file) {
        Some(InputFormat::NTriples) => "application/n-triples",
        Some(InputFormat::Turtle) => "text/turtle",
        _ => "application/rdf+xml",
    }
}

fn handle_status(response: Response) -> Result<(), TaxonomyError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let message = response
        .text()
        .unwrap_or_else(|_| "dataset administration request failed".to_string());
    Err(TaxonomyError::AdminStatus {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_content_type_follows_extension() {
        assert_eq!(content_type(Path::new("taxa.nt")), "application/n-triples");
        assert_eq!(content_type(Path::new("taxa.ttl")), "text/turtle");
        assert_eq!(content_type(Path::new("ncbitaxon.owl")), "application/rdf+xml");
        assert_eq!(content_type(Path::new("taxa.nt.gz")), "application/n-triples");
    }

    #[test]
    fn gzip_uploads_use_the_inner_file_name() {
        assert_eq!(upload_name(Path::new("/data/taxa.nt.gz")).as_deref(), Some("taxa.nt"));
        assert_eq!(upload_name(Path::new("ncbitaxon.owl")), None);
    }
}
