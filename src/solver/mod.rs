//! Pairwise registration: manual point-pair fits, feature matching and batch
//! auto-matching of one image against many.

pub mod batch;
pub mod common;
pub mod correspondence;

pub use self::batch::{auto_match, BatchProgress};
pub use self::common::{
    brute_force_knn, DescriptorMatch, FeatureMatcher, FeatureSet, RobustFit,
};
pub use self::correspondence::{
    extract_features, find_homography, fit_least_squares, prepare_detection_image, solve_manual,
    AutoRegistration, ManualRegistration,
};
