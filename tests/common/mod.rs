//! Fixtures shared by the integration tests.

use std::convert::Infallible;
use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use pcb_retrace::solver::{
    brute_force_knn, fit_least_squares, DescriptorMatch, FeatureMatcher, RobustFit,
};
use pcb_retrace::{Image, Point};

/// Bright pixels are keypoints and their intensity is the descriptor.
pub struct DotMatcher;

impl FeatureMatcher for DotMatcher {
    type Descriptors = Vec<u8>;
    type E = Infallible;

    fn detect_and_describe(&self, image: &GrayImage) -> Result<(Vec<Point>, Vec<u8>), Infallible> {
        Ok(image
            .enumerate_pixels()
            .filter(|(_, _, p)| p[0] > 0)
            .map(|(x, y, p)| (Point::new(x as f64, y as f64), p[0]))
            .unzip())
    }

    fn descriptor_count(&self, descriptors: &Vec<u8>) -> usize {
        descriptors.len()
    }

    fn knn_match(&self, query: &Vec<u8>, train: &Vec<u8>, k: usize) -> Vec<Vec<DescriptorMatch>> {
        brute_force_knn(query, train, k, |q: &u8, t: &u8| q.abs_diff(*t) as f32)
    }

    fn fit_robust_homography(&self, src: &[Point], dst: &[Point], threshold: f64) -> Option<RobustFit> {
        fit_least_squares(src, dst, threshold)
    }
}

pub const DOTS: [(u32, u32); 10] = [
    (4, 6),
    (41, 9),
    (13, 35),
    (28, 17),
    (46, 40),
    (9, 24),
    (34, 3),
    (20, 48),
    (51, 29),
    (25, 31),
];

/// PNG with the fixture dots shifted by `(dx, dy)`.
pub fn dot_png(w: u32, h: u32, dx: u32, dy: u32, with_dots: bool) -> Vec<u8> {
    let mut img = GrayImage::new(w, h);
    if with_dots {
        for (i, &(x, y)) in DOTS.iter().enumerate() {
            img.put_pixel(x + dx, y + dy, Luma([20 * (i as u8 + 1)]));
        }
    }
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn photo(id: &str, name: &str, raster: Vec<u8>) -> Image {
    Image {
        id: id.into(),
        board_id: "board".into(),
        name: name.to_string(),
        raster,
    }
}
