//! Primitives and traits for feature-based registration
//!
//! Provides the [FeatureMatcher] trait, the seam to whatever keypoint detector
//! and descriptor matcher is available (ORB + brute-force Hamming in the
//! reference setup), as well as the [FeatureSet] type handed between
//! extraction and [super::correspondence::find_homography].
//!

use std::error::Error;

use image::GrayImage;

use crate::common::Point;
use crate::math::Homography;

/// Keypoint detection, descriptor matching and robust fitting.
///
/// The registration core owns the ratio test, correspondence assembly and
/// rescaling; implementors only supply the low level primitives.
pub trait FeatureMatcher {
    /// Descriptor matrix for one image, one row per keypoint.
    type Descriptors;
    type E: Error;

    /// Detects keypoints on `image` and computes their descriptors.
    /// Keypoint coordinates are in `image`'s own pixel space.
    fn detect_and_describe(&self, image: &GrayImage)
        -> Result<(Vec<Point>, Self::Descriptors), Self::E>;

    /// Number of descriptor rows.
    fn descriptor_count(&self, descriptors: &Self::Descriptors) -> usize;

    /// For every query row, up to `k` train rows ordered by ascending distance.
    fn knn_match(
        &self,
        query: &Self::Descriptors,
        train: &Self::Descriptors,
        k: usize,
    ) -> Vec<Vec<DescriptorMatch>>;

    /// Outlier-robust homography mapping `src` onto `dst`.
    /// `None` when the estimator degenerates.
    fn fit_robust_homography(
        &self,
        src: &[Point],
        dst: &[Point],
        outlier_threshold_px: f64,
    ) -> Option<RobustFit>;
}

/// One nearest-neighbour candidate from [FeatureMatcher::knn_match].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DescriptorMatch {
    pub query_idx: usize,
    pub train_idx: usize,
    pub distance: f32,
}

/// Exhaustive kNN: every query row against every train row, `k` best per row
/// by ascending `distance`. Ties keep train order.
pub fn brute_force_knn<T>(
    query: &[T],
    train: &[T],
    k: usize,
    distance: impl Fn(&T, &T) -> f32,
) -> Vec<Vec<DescriptorMatch>> {
    query
        .iter()
        .enumerate()
        .map(|(query_idx, q)| {
            let mut row: Vec<DescriptorMatch> = train
                .iter()
                .enumerate()
                .map(|(train_idx, t)| DescriptorMatch {
                    query_idx,
                    train_idx,
                    distance: distance(q, t),
                })
                .collect();
            row.sort_by(|a, b| a.distance.total_cmp(&b.distance));
            row.truncate(k);
            row
        })
        .collect()
}

/// Result of [FeatureMatcher::fit_robust_homography].
#[derive(Debug, Clone, PartialEq)]
pub struct RobustFit {
    pub h: Homography,
    pub inlier_mask: Vec<bool>,
}

impl RobustFit {
    pub fn inlier_count(&self) -> usize {
        self.inlier_mask.iter().filter(|&&inlier| inlier).count()
    }
}

/// Features of one image, detected on a downscaled copy.
#[derive(Debug, Clone)]
pub struct FeatureSet<D> {
    /// Keypoints in detection-image pixels
    pub keypoints: Vec<Point>,
    pub descriptors: D,
    /// Factor applied to the full-resolution image before detection (≤ 1)
    pub scale: f64,
    /// Full-resolution width
    pub width: u32,
    /// Full-resolution height
    pub height: u32,
}

impl<D> FeatureSet<D> {
    /// Keypoint `idx` in full-resolution pixels.
    pub fn full_res_keypoint(&self, idx: usize) -> Option<Point> {
        self.keypoints
            .get(idx)
            .map(|p| Point::new(p.x / self.scale, p.y / self.scale))
    }
}
