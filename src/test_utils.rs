//! Shared fixtures for unit tests: a deterministic point scatter and a tiny
//! [FeatureMatcher] whose "descriptors" are pixel intensities.

use std::convert::Infallible;
use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use crate::common::{OverlapEdge, Point, PointPair};
use crate::math::Homography;
use crate::solver::common::{brute_force_knn, DescriptorMatch, FeatureMatcher, RobustFit};
use crate::solver::correspondence::{fit_least_squares, AutoRegistration};

/// `n` well spread, non-collinear points inside `[0, extent)²`.
pub(crate) fn scattered_points(n: usize, extent: f64) -> Vec<Point> {
    (0..n)
        .map(|i| {
            let i = i as f64;
            let fx = (0.1 + i * 0.618_034).fract();
            let fy = (0.3 + i * 0.414_214 + i * i * 0.137).fract();
            Point::new(extent * fx, extent * fy)
        })
        .collect()
}

/// Black image with single bright pixels; each pixel value doubles as the
/// keypoint's descriptor.
pub(crate) fn dot_image(w: u32, h: u32, dots: &[(u32, u32, u8)]) -> DynamicImage {
    let mut img = GrayImage::new(w, h);
    for &(x, y, v) in dots {
        img.put_pixel(x, y, Luma([v]));
    }
    DynamicImage::ImageLuma8(img)
}

pub(crate) fn png_bytes(img: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("png encoding of an in-memory image");
    bytes
}

/// Descriptors are integer ids; distance is their absolute difference.
pub(crate) struct IdMatcher;

impl FeatureMatcher for IdMatcher {
    type Descriptors = Vec<u32>;
    type E = Infallible;

    fn detect_and_describe(&self, image: &GrayImage) -> Result<(Vec<Point>, Vec<u32>), Infallible> {
        Ok(image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(|(x, y, p)| (Point::new(x as f64, y as f64), p[0] as u32))
            .unzip())
    }

    fn descriptor_count(&self, descriptors: &Vec<u32>) -> usize {
        descriptors.len()
    }

    fn knn_match(&self, query: &Vec<u32>, train: &Vec<u32>, k: usize) -> Vec<Vec<DescriptorMatch>> {
        brute_force_knn(query, train, k, |q: &u32, t: &u32| q.abs_diff(*t) as f32)
    }

    fn fit_robust_homography(&self, src: &[Point], dst: &[Point], outlier_threshold_px: f64) -> Option<RobustFit> {
        fit_least_squares(src, dst, outlier_threshold_px)
    }
}

/// Manual edge whose point pairs are sampled through `h`.
pub(crate) fn manual_edge(from: &str, to: &str, h: &Homography) -> OverlapEdge {
    let points = scattered_points(6, 1000.0)
        .into_iter()
        .filter_map(|s| Some(PointPair::new(s, h.project(s.x, s.y)?)))
        .collect();
    OverlapEdge::manual(from.into(), to.into(), points).expect("fixture homography is regular")
}

/// Automatic edge carrying `h` verbatim.
pub(crate) fn auto_edge(from: &str, to: &str, h: &Homography) -> OverlapEdge {
    let registration = AutoRegistration {
        h: *h,
        inv_h: h.inverse().expect("fixture homography is regular"),
        match_count: 50,
    };
    OverlapEdge::automatic(from.into(), to.into(), &registration)
}
