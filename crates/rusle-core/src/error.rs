//! Error taxonomy for the RUSLE pipeline.
//!
//! Every failure is a configuration or input-data problem; nothing here is
//! retried. `Stage` wraps an inner error with the factor and stage that
//! produced it so the message points at the input to fix.

use thiserror::Error;

use crate::stack::Factor;

#[derive(Error, Debug)]
pub enum Error {
    #[error("source unavailable: collection '{name}' cannot be resolved")]
    SourceUnavailable { name: String },

    #[error("empty result from '{name}': {detail}")]
    EmptyResult { name: String, detail: String },

    #[error("CRS mismatch: expected {expected}, found {found}")]
    CrsMismatch { expected: String, found: String },

    #[error(
        "resource limit exceeded in {stage}: {pixels} pixels > max_pixels {limit}; \
         use a coarser analysis scale"
    )]
    ResourceLimitExceeded {
        stage: &'static str,
        pixels: u64,
        limit: u64,
    },

    #[error("division singularity: {detail}")]
    DivisionSingularity { detail: String },

    #[error("unsupported CRS: {0}")]
    UnsupportedCrs(String),

    #[error("band '{band}' not found (available: {available})")]
    MissingBand { band: String, available: String },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid date '{value}': {source}")]
    DateParse {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),

    #[error("{factor} factor, {stage}: {source}")]
    Stage {
        factor: Factor,
        stage: &'static str,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attach factor/stage context to a fallible step.
pub trait ResultExt<T> {
    fn in_stage(self, factor: Factor, stage: &'static str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn in_stage(self, factor: Factor, stage: &'static str) -> Result<T> {
        self.map_err(|e| Error::Stage {
            factor,
            stage,
            source: Box::new(e),
        })
    }
}

impl Error {
    /// Innermost error beneath any `Stage` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_names_factor_and_stage() {
        let inner: Result<()> = Err(Error::SourceUnavailable { name: "CHIRPS".into() });
        let err = inner.in_stage(Factor::R, "load").unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("R factor, load:"), "got {msg}");
        assert!(matches!(err.root(), Error::SourceUnavailable { .. }));
    }

    #[test]
    fn resource_limit_message_suggests_coarser_scale() {
        let err = Error::ResourceLimitExceeded { stage: "zonal", pixels: 10, limit: 5 };
        assert!(err.to_string().contains("coarser"));
    }
}
