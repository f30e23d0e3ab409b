//! Homography estimation from point correspondences.
//!
//! - [solve_manual]: least squares over hand-picked pairs (normalized DLT).
//! - [find_homography]: ratio-test matching of two [FeatureSet]s followed by a
//!   robust fit supplied by the [FeatureMatcher].

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use log::debug;
use nalgebra::{DMatrix, Matrix3};

use crate::common::{Point, PointPair};
use crate::config::MatchParams;
use crate::math::{invert, Homography};

use super::common::{FeatureMatcher, FeatureSet, RobustFit};

/// Fewest pairs that determine a homography.
pub const MIN_MANUAL_PAIRS: usize = 4;

/// Relative eigenvalue floor of `AᵀA` below which the fit is rank deficient.
const RANK_EPS: f64 = 1e-12;
/// Relative spread below which a point layout counts as collinear.
const COLLINEAR_EPS: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub struct ManualRegistration {
    pub h: Homography,
    pub inv_h: Homography,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoRegistration {
    pub h: Homography,
    pub inv_h: Homography,
    /// Ratio-test survivors fed to the robust fit
    pub match_count: usize,
}

/// Translate the centroid to the origin and scale to mean distance √2.
fn normalize_points(pts: &[Point]) -> Option<(Matrix3<f64>, Vec<Point>)> {
    let n = pts.len() as f64;
    let cx = pts.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = pts.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = pts
        .iter()
        .map(|p| (p.x - cx).hypot(p.y - cy))
        .sum::<f64>()
        / n;
    if !mean_dist.is_finite() || mean_dist < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = pts
        .iter()
        .map(|p| Point::new(s * (p.x - cx), s * (p.y - cy)))
        .collect();
    Some((t, normalized))
}

/// True when normalized points all lie on one line.
fn is_collinear(normalized: &[Point]) -> bool {
    let n = normalized.len() as f64;
    let (mut sxx, mut sxy, mut syy) = (0.0, 0.0, 0.0);
    for p in normalized {
        sxx += p.x * p.x;
        sxy += p.x * p.y;
        syy += p.y * p.y;
    }
    let (a, b, c) = (sxx / n, sxy / n, syy / n);
    let half_trace = 0.5 * (a + c);
    let spread = (0.25 * (a - c).powi(2) + b * b).sqrt();
    let min_eig = half_trace - spread;
    let max_eig = half_trace + spread;
    min_eig <= COLLINEAR_EPS * max_eig
}

fn to_homography(m: &Matrix3<f64>) -> Homography {
    Homography::from_row_major([
        m[(0, 0)],
        m[(0, 1)],
        m[(0, 2)],
        m[(1, 0)],
        m[(1, 1)],
        m[(1, 2)],
        m[(2, 0)],
        m[(2, 1)],
        m[(2, 2)],
    ])
}

/// Least-squares homography from hand-picked pairs, with its inverse.
///
/// Needs at least four pairs. Returns `None` for collinear or duplicated
/// points and for fits that come out singular.
pub fn solve_manual(pairs: &[PointPair]) -> Option<ManualRegistration> {
    let n = pairs.len();
    if n < MIN_MANUAL_PAIRS {
        debug!("solve_manual: {n} pairs, need {MIN_MANUAL_PAIRS}");
        return None;
    }

    let src: Vec<Point> = pairs.iter().map(|p| p.s).collect();
    let dst: Vec<Point> = pairs.iter().map(|p| p.d).collect();
    let (t_src, src_n) = normalize_points(&src)?;
    let (t_dst, dst_n) = normalize_points(&dst)?;
    if is_collinear(&src_n) || is_collinear(&dst_n) {
        debug!("solve_manual: collinear points");
        return None;
    }

    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for (i, (s, d)) in src_n.iter().zip(&dst_n).enumerate() {
        let r = 2 * i;
        a[(r, 3)] = -s.x;
        a[(r, 4)] = -s.y;
        a[(r, 5)] = -1.0;
        a[(r, 6)] = d.y * s.x;
        a[(r, 7)] = d.y * s.y;
        a[(r, 8)] = d.y;

        a[(r + 1, 0)] = s.x;
        a[(r + 1, 1)] = s.y;
        a[(r + 1, 2)] = 1.0;
        a[(r + 1, 6)] = -d.x * s.x;
        a[(r + 1, 7)] = -d.x * s.y;
        a[(r + 1, 8)] = -d.x;
    }

    // h is the eigenvector of AᵀA with the smallest eigenvalue
    let eig = nalgebra::SymmetricEigen::new(a.transpose() * &a);
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&i, &j| eig.eigenvalues[i].abs().total_cmp(&eig.eigenvalues[j].abs()));
    let largest = eig.eigenvalues[order[8]].abs();
    if eig.eigenvalues[order[1]].abs() <= RANK_EPS * largest {
        debug!("solve_manual: correspondences do not constrain a unique homography");
        return None;
    }
    let v = eig.eigenvectors.column(order[0]);
    let h_norm = Matrix3::new(v[0], v[1], v[2], v[3], v[4], v[5], v[6], v[7], v[8]);

    let h = t_dst.try_inverse()? * h_norm * t_src;
    let scale = h[(2, 2)];
    let h = if scale.abs() > 1e-15 { h / scale } else { h };
    if h.iter().any(|x| !x.is_finite()) {
        return None;
    }

    let h = to_homography(&h);
    let inv_h = invert(&h)?;
    Some(ManualRegistration { h, inv_h })
}

/// Plain least-squares fit over every correspondence, with inliers judged
/// against `outlier_threshold_px`. For matchers without a robust estimator
/// whose correspondences are already clean.
pub fn fit_least_squares(src: &[Point], dst: &[Point], outlier_threshold_px: f64) -> Option<RobustFit> {
    let pairs: Vec<PointPair> = src
        .iter()
        .zip(dst)
        .map(|(s, d)| PointPair::new(*s, *d))
        .collect();
    let h = solve_manual(&pairs)?.h;
    let inlier_mask = pairs
        .iter()
        .map(|p| {
            h.project(p.s.x, p.s.y)
                .is_some_and(|q| q.distance(&p.d) < outlier_threshold_px)
        })
        .collect();
    Some(RobustFit { h, inlier_mask })
}

/// Downscales `image` so its longer side is at most `max_dim` and converts it
/// to grayscale. Returns the detection image and the applied scale (≤ 1).
pub fn prepare_detection_image(image: &DynamicImage, max_dim: u32) -> (GrayImage, f64) {
    let (w, h) = (image.width(), image.height());
    let longer = w.max(h);
    let gray = image.to_luma8();
    if longer == 0 || longer <= max_dim {
        return (gray, 1.0);
    }

    let scale = max_dim as f64 / longer as f64;
    let nw = ((w as f64 * scale).round() as u32).max(1);
    let nh = ((h as f64 * scale).round() as u32).max(1);
    (
        image::imageops::resize(&gray, nw, nh, FilterType::Triangle),
        scale,
    )
}

/// Runs detection on a downscaled copy of `image`.
pub fn extract_features<M: FeatureMatcher>(
    matcher: &M,
    image: &DynamicImage,
    params: &MatchParams,
) -> Result<FeatureSet<M::Descriptors>, M::E> {
    let (small, scale) = prepare_detection_image(image, params.max_detection_dim);
    let (keypoints, descriptors) = matcher.detect_and_describe(&small)?;
    debug!(
        "extract_features: {} keypoints at scale {scale:.3}",
        keypoints.len()
    );
    Ok(FeatureSet {
        keypoints,
        descriptors,
        scale,
        width: image.width(),
        height: image.height(),
    })
}

/// Homography mapping full-resolution pixels of `a` onto `b`.
///
/// `None` when either set is empty, fewer than `params.min_matches` matches
/// survive the ratio test, or the robust fit degenerates.
pub fn find_homography<M: FeatureMatcher>(
    matcher: &M,
    a: &FeatureSet<M::Descriptors>,
    b: &FeatureSet<M::Descriptors>,
    params: &MatchParams,
) -> Option<AutoRegistration> {
    if matcher.descriptor_count(&a.descriptors) == 0
        || matcher.descriptor_count(&b.descriptors) == 0
    {
        return None;
    }

    let candidates = matcher.knn_match(&a.descriptors, &b.descriptors, 2);
    let good: Vec<_> = candidates
        .iter()
        .filter_map(|knn| match knn.as_slice() {
            [best, second, ..] if best.distance < params.ratio * second.distance => Some(*best),
            _ => None,
        })
        .collect();

    let (src, dst): (Vec<Point>, Vec<Point>) = good
        .iter()
        .filter_map(|m| Some((a.full_res_keypoint(m.query_idx)?, b.full_res_keypoint(m.train_idx)?)))
        .unzip();
    if src.len() < params.min_matches {
        debug!(
            "find_homography: {} ratio-test matches, need {}",
            src.len(),
            params.min_matches
        );
        return None;
    }

    let fit = matcher.fit_robust_homography(&src, &dst, params.ransac_threshold_px)?;
    let inv_h = invert(&fit.h)?;
    debug!(
        "find_homography: {} matches, {} inliers",
        src.len(),
        fit.inlier_count()
    );
    Some(AutoRegistration {
        h: fit.h,
        inv_h,
        match_count: src.len(),
    })
}
