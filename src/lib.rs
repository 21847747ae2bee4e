#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod config;
pub mod cox;
pub mod cv;
pub mod data;
pub mod estimate;
pub mod faer_ndarray;
pub mod family;
pub mod fitter;
pub mod path;
pub mod screening;
pub mod splicing;
pub mod types;

pub use config::{
    BessConfig, ConstraintConfig, CvConfig, FitterConfig, PathConfig, ScreeningConfig,
    SelectionConfig, SplicingConfig,
};
pub use data::{DesignMatrix, GroupLayout, Ingested, Response, Standardization, ingest};
pub use estimate::{BessFit, EstimationError, SelectionMethod, fit_bess};
pub use family::FamilyModel;
pub use fitter::{ActiveFit, FitterOptions, fit_active};
pub use path::{PathOutcome, PathRecord, information_criterion, run_path};
pub use splicing::{SearchContext, SplicingOutcome, splice};
pub use types::{Coefficients, Family, FitStatus, IcType, PathType};
