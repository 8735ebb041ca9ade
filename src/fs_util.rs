use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::MultiGzDecoder;

use crate::error::TaxonomyError;

const READ_BUFFER: usize = 1 << 20;

/// Opens an input file for streaming, decompressing `.gz` transparently.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>, TaxonomyError> {
    if !path.exists() {
        return Err(TaxonomyError::InputNotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|err| TaxonomyError::InputRead {
        path: path.display().to_string(),
        message: err.to_string(),
    })?;
    let is_gzip = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false);
    if is_gzip {
        Ok(Box::new(BufReader::with_capacity(
            READ_BUFFER,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(READ_BUFFER, file)))
    }
}

/// Writes `path` through a temp file in the same directory and renames it into place.
pub fn write_atomic<F>(path: &Path, write: F) -> Result<(), TaxonomyError>
where
    F: FnOnce(&mut dyn Write) -> Result<(), TaxonomyError>,
{
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|err| TaxonomyError::Filesystem(err.to_string()))?;
    let temp = tempfile::Builder::new()
        .prefix("kira-tx-out")
        .tempfile_in(parent)
        .map_err(|err| TaxonomyError::Filesystem(err.to_string()))?;
    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer
            .flush()
            .map_err(|err| TaxonomyError::Filesystem(format!("flush {}: {err}", path.display())))?;
    }
    temp.persist(path)
        .map_err(|err| TaxonomyError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn io_error(context: &str, err: io::Error) -> TaxonomyError {
    TaxonomyError::Filesystem(format!("{context}: {err}"))
}
