use std::collections::BTreeSet;
use std::io::Write;

use super::write_err;
use crate::domain::Triple;
use crate::error::TaxonomyError;

pub(super) fn write(triples: &BTreeSet<Triple>, out: &mut dyn Write) -> Result<(), TaxonomyError> {
    for triple in triples {
        writeln!(out, "{triple}").map_err(write_err)?;
    }
    Ok(())
}
