//! RUSLE factor estimators.
//!
//! Each estimator is a pure function of its input collection and the area
//! of interest (given in the input's own CRS). None of them depends on
//! another, so the pipeline runs them concurrently.

pub mod cover;
pub mod land_cover;
pub mod rainfall;
pub mod soil;
pub mod terrain;

pub use cover::{compute_c_factor, CoverFactor, CoverParams};
pub use land_cover::compute_lulc;
pub use rainfall::compute_r_factor;
pub use soil::{compute_k_factor, ClassificationTable};
pub use terrain::compute_ls_factor;
