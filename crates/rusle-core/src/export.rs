//! Table export of zonal results.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Error, Result};
use crate::vector::AttributeValue;
use crate::zonal::ZonalResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Json,
}

impl FromStr for ExportFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(Error::InvalidInput(format!("unknown export format '{other}' (csv, json)"))),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Json => "json",
        })
    }
}

/// Column order: input attributes by key, then the band columns.
fn columns(result: &ZonalResult) -> Vec<&str> {
    result
        .attribute_keys()
        .iter()
        .chain(result.bands())
        .map(String::as_str)
        .collect()
}

/// Header and text cells, one row per subbasin. No-data is an empty cell.
pub fn table_cells(result: &ZonalResult) -> (Vec<String>, Vec<Vec<String>>) {
    let cols = columns(result);
    let rows = result
        .features()
        .iter()
        .map(|f| {
            cols.iter()
                .map(|c| f.get_property(c).map(|v| v.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();
    (cols.into_iter().map(str::to_string).collect(), rows)
}

/// Write `result` to `writer`. The result is only read.
pub fn export_table<W: Write>(result: &ZonalResult, writer: W, format: ExportFormat) -> Result<()> {
    match format {
        ExportFormat::Csv => {
            let (headers, rows) = table_cells(result);
            let mut wtr = csv::Writer::from_writer(writer);
            wtr.write_record(&headers)?;
            for row in &rows {
                wtr.write_record(row)?;
            }
            wtr.flush()?;
        }
        ExportFormat::Json => {
            let cols = columns(result);
            let null = AttributeValue::Null;
            let rows: Vec<BTreeMap<&str, &AttributeValue>> = result
                .features()
                .iter()
                .map(|f| cols.iter().map(|&c| (c, f.get_property(c).unwrap_or(&null))).collect())
                .collect();
            serde_json::to_writer_pretty(writer, &rows)?;
        }
    }
    Ok(())
}

pub fn export_to_path(result: &ZonalResult, path: impl AsRef<Path>, format: ExportFormat) -> Result<()> {
    let path = path.as_ref();
    let mut out = BufWriter::new(File::create(path)?);
    export_table(result, &mut out, format)?;
    out.flush()?;
    info!(path = %path.display(), %format, rows = result.len(), "table exported");
    Ok(())
}
