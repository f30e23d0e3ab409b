//! Records shared by the registration graph, the heuristics and storage.
//!
//! Identifiers are simple newtype wrappers around [String].

use derive_more::{Deref, Display, From};
use glam::DVec2;
use serde::{Deserialize, Serialize};

use crate::math::Homography;
use crate::solver::correspondence::{solve_manual, AutoRegistration, ManualRegistration};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Deref, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);
        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }
        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Photograph identity
    ImageId
);
string_id!(
    /// Overlap edge identity
    EdgeId
);
string_id!(ComponentId);
string_id!(NetId);
string_id!(
    /// Board (project) identity; images, components and nets all belong to one
    BoardId
);

/// A pixel position in some image's coordinate space.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}
impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}
impl From<Point> for DVec2 {
    fn from(p: Point) -> Self {
        DVec2::new(p.x, p.y)
    }
}
impl From<DVec2> for Point {
    fn from(v: DVec2) -> Self {
        Self::new(v.x, v.y)
    }
}

/// Hand-picked correspondence: `s` in the source image, `d` in the destination.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointPair {
    pub s: Point,
    pub d: Point,
}
impl PointPair {
    pub fn new(s: Point, d: Point) -> Self {
        Self { s, d }
    }
}

/// A stored photograph of a board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub id: ImageId,
    pub board_id: BoardId,
    pub name: String,
    /// Encoded raster (PNG/JPEG). Never changes once stored.
    #[serde(default)]
    pub raster: Vec<u8>,
}

/// How an overlap edge was obtained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum EdgeSource {
    /// User clicked point pairs; the list regenerates the homography.
    Manual { points: Vec<PointPair> },
    /// Feature matching.
    Automatic,
}

/// Pairwise registration between two images.
///
/// `homography` maps `from_image_id` pixels to `to_image_id` pixels and
/// `inverse_homography` the other way. The inverse is computed once here and
/// never edited on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapEdge {
    pub id: EdgeId,
    pub from_image_id: ImageId,
    pub to_image_id: ImageId,
    homography: Homography,
    inverse_homography: Homography,
    match_count: usize,
    source: EdgeSource,
}

impl OverlapEdge {
    /// `<len(from)>:<from>~<to>`. The length prefix keeps ids unique even
    /// when image ids contain the separator.
    fn pair_id(from: &ImageId, to: &ImageId) -> EdgeId {
        EdgeId::new(format!("{}:{from}~{to}", from.len()))
    }

    /// Fits a manual edge from point pairs. `None` when the points are degenerate.
    pub fn manual(from: ImageId, to: ImageId, points: Vec<PointPair>) -> Option<Self> {
        let ManualRegistration { h, inv_h } = solve_manual(&points)?;
        Some(Self {
            id: Self::pair_id(&from, &to),
            from_image_id: from,
            to_image_id: to,
            homography: h,
            inverse_homography: inv_h,
            match_count: points.len(),
            source: EdgeSource::Manual { points },
        })
    }

    pub fn automatic(from: ImageId, to: ImageId, registration: &AutoRegistration) -> Self {
        Self {
            id: Self::pair_id(&from, &to),
            from_image_id: from,
            to_image_id: to,
            homography: registration.h,
            inverse_homography: registration.inv_h,
            match_count: registration.match_count,
            source: EdgeSource::Automatic,
        }
    }

    /// Re-solves a manual edge from its stored points; `None` for automatic edges.
    pub fn regenerate(&self) -> Option<Self> {
        match &self.source {
            EdgeSource::Manual { points } => Self::manual(
                self.from_image_id.clone(),
                self.to_image_id.clone(),
                points.clone(),
            )
            .map(|edge| Self {
                id: self.id.clone(),
                ..edge
            }),
            EdgeSource::Automatic => None,
        }
    }

    pub fn homography(&self) -> &Homography {
        &self.homography
    }
    pub fn inverse_homography(&self) -> &Homography {
        &self.inverse_homography
    }
    pub fn match_count(&self) -> usize {
        self.match_count
    }
    pub fn source(&self) -> &EdgeSource {
        &self.source
    }
    pub fn is_manual(&self) -> bool {
        matches!(self.source, EdgeSource::Manual { .. })
    }
    pub fn manual_points(&self) -> Option<&[PointPair]> {
        match &self.source {
            EdgeSource::Manual { points } => Some(points),
            EdgeSource::Automatic => None,
        }
    }

    /// Does this edge register `a` with `b`, in either direction
    pub fn connects(&self, a: &ImageId, b: &ImageId) -> bool {
        (&self.from_image_id == a && &self.to_image_id == b)
            || (&self.from_image_id == b && &self.to_image_id == a)
    }

    pub fn touches(&self, id: &ImageId) -> bool {
        &self.from_image_id == id || &self.to_image_id == id
    }
}

/// Primary placement of a component: one point in one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub img_id: ImageId,
    pub x: f64,
    pub y: f64,
}
impl Location {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// A labeled part on the board (BOM line).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Component {
    pub id: ComponentId,
    pub board_id: BoardId,
    /// Reference designator, e.g. `R12`
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: Option<Location>,
}

/// An annotated pad or pin in its source image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub img_id: ImageId,
    pub x: f64,
    pub y: f64,
    /// Pin label, e.g. `R12.1`
    pub label: String,
}
impl Node {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Net {
    pub id: NetId,
    pub board_id: BoardId,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

/// One reachable image from a graph solve.
///
/// `h` maps a point in the solve's start image to this image.
#[derive(Debug, Clone, PartialEq)]
pub struct PathResult {
    pub id: ImageId,
    pub h: Homography,
    pub total_cost: u32,
}

/// A component's position in some target image, either stored there or
/// projected through the registration graph.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedComponent {
    pub id: ComponentId,
    pub label: String,
    pub position: Point,
    /// Stored on the target image rather than projected onto it
    pub direct: bool,
}
