//! Soil loss `A = R·K·LS·C` per subbasin.
//!
//! Works either directly on a [`ZonalResult`] or on a factor table that was
//! exported earlier (CSV with `R`, `K`, `LS`, `C` columns).

use std::io::{Read, Write};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::export::table_cells;
use crate::stack::Factor;
use crate::zonal::ZonalResult;

pub const SOIL_EROSION: &str = "Soil_Erosion";

const PRODUCT_FACTORS: [Factor; 4] = [Factor::R, Factor::K, Factor::LS, Factor::C];

/// Product of the four factors; `None` when any is missing.
#[inline]
pub fn soil_loss(r: Option<f64>, k: Option<f64>, ls: Option<f64>, c: Option<f64>) -> Option<f64> {
    Some(r? * k? * ls? * c?)
}

/// Mean over the defined values, `None` if there are none.
pub fn mean_defined(values: &[Option<f64>]) -> Option<f64> {
    let (sum, n) = values.iter().flatten().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// Soil loss for every subbasin of a zonal result, in feature order.
pub fn soil_loss_from_zonal(result: &ZonalResult) -> Vec<Option<f64>> {
    (0..result.len())
        .map(|i| {
            let [r, k, ls, c] = PRODUCT_FACTORS.map(|f| result.mean(i, f.band_name()));
            soil_loss(r, k, ls, c)
        })
        .collect()
}

/// Header plus string rows, as read from or written to CSV.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SoilLossTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SoilLossTable {
    pub fn from_zonal(result: &ZonalResult) -> Self {
        let (headers, rows) = table_cells(result);
        Self { headers, rows }
    }

    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::Reader::from_reader(reader);
        let headers = rdr.headers()?.iter().map(str::to_string).collect();
        let rows = rdr
            .records()
            .map(|rec| rec.map(|r| r.iter().map(str::to_string).collect()))
            .collect::<std::result::Result<Vec<Vec<String>>, _>>()?;
        Ok(Self { headers, rows })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::read_csv(std::fs::File::open(path)?)
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.headers)?;
        for row in &self.rows {
            wtr.write_record(row)?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        self.write_csv(std::fs::File::create(path)?)
    }

    pub fn column(&self, name: &str) -> Result<usize> {
        self.headers.iter().position(|h| h == name).ok_or_else(|| {
            Error::InvalidInput(format!("column '{name}' not found (have: {})", self.headers.join(", ")))
        })
    }

    /// Parsed values of `name`; empty or non-numeric cells are `None`.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let idx = self.column(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(idx).and_then(|cell| cell.trim().parse::<f64>().ok()).filter(|v| v.is_finite()))
            .collect())
    }

    /// Append (or overwrite) the `Soil_Erosion` column and return the mean
    /// over rows with a value.
    pub fn add_soil_loss(&mut self) -> Result<Option<f64>> {
        let columns = PRODUCT_FACTORS
            .iter()
            .map(|f| self.numeric_column(f.band_name()))
            .collect::<Result<Vec<_>>>()?;
        let losses: Vec<Option<f64>> = (0..self.rows.len())
            .map(|i| soil_loss(columns[0][i], columns[1][i], columns[2][i], columns[3][i]))
            .collect();

        let idx = match self.column(SOIL_EROSION) {
            Ok(i) => i,
            Err(_) => {
                self.headers.push(SOIL_EROSION.to_string());
                self.headers.len() - 1
            }
        };
        for (row, loss) in self.rows.iter_mut().zip(&losses) {
            row.resize(row.len().max(idx + 1), String::new());
            row[idx] = loss.map(|v| v.to_string()).unwrap_or_default();
        }

        let missing = losses.iter().filter(|v| v.is_none()).count();
        if missing > 0 {
            warn!(missing, "rows without soil loss (a factor is no-data)");
        }
        let mean = mean_defined(&losses);
        info!(rows = self.rows.len(), mean = mean.unwrap_or(f64::NAN), "soil loss computed");
        Ok(mean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const CSV: &str = "HYBAS_ID,R,K,LS,C,LULC\n\
                       1,260.5,0.0264,1.7,0.5,12\n\
                       2,333.1,0.0264,1.7,,12\n\
                       3,300,0.05,2,1,7\n";

    #[test]
    fn product_is_none_when_any_factor_missing() {
        assert_eq!(soil_loss(Some(2.0), Some(3.0), Some(4.0), Some(0.5)), Some(12.0));
        assert_eq!(soil_loss(Some(2.0), None, Some(4.0), Some(0.5)), None);
    }

    #[test]
    fn csv_table_gains_soil_erosion_column() {
        let mut table = SoilLossTable::read_csv(CSV.as_bytes()).unwrap();
        let mean = table.add_soil_loss().unwrap().unwrap();
        assert_eq!(table.headers.last().map(String::as_str), Some(SOIL_EROSION));

        let values = table.numeric_column(SOIL_EROSION).unwrap();
        assert_relative_eq!(values[0].unwrap(), 260.5 * 0.0264 * 1.7 * 0.5, epsilon = 1e-12);
        assert_eq!(values[1], None);
        assert_relative_eq!(values[2].unwrap(), 30.0, epsilon = 1e-12);
        assert_relative_eq!(mean, (values[0].unwrap() + 30.0) / 2.0, epsilon = 1e-12);
    }

    #[test]
    fn rerun_overwrites_instead_of_duplicating() {
        let mut table = SoilLossTable::read_csv(CSV.as_bytes()).unwrap();
        table.add_soil_loss().unwrap();
        table.add_soil_loss().unwrap();
        assert_eq!(table.headers.iter().filter(|h| *h == SOIL_EROSION).count(), 1);
    }

    #[test]
    fn missing_factor_column_is_reported() {
        let mut table = SoilLossTable::read_csv("id,R,K,LS\n1,1,1,1\n".as_bytes()).unwrap();
        let err = table.add_soil_loss().unwrap_err();
        assert!(err.to_string().contains("'C'"), "got {err}");
    }

    #[test]
    fn csv_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Subbasin_Soil_Erosion.csv");
        let mut table = SoilLossTable::read_csv(CSV.as_bytes()).unwrap();
        table.add_soil_loss().unwrap();
        table.to_path(&path).unwrap();
        assert_eq!(SoilLossTable::from_path(&path).unwrap(), table);
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert_eq!(mean_defined(&[None, None]), None);
        assert_eq!(mean_defined(&[]), None);
    }
}
