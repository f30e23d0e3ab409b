//! Photo registration core for PCB reverse engineering.
//!
//! Several photographs of one board are tied together by pairwise
//! homographies ([common::OverlapEdge]). [graph] composes them along the
//! most trusted path so an annotation made on any photo can be shown on every
//! other; [orientation] works out which photos show the back and which pin
//! label a click most likely means; [session::BoardSession] wraps it all
//! behind a [storage::Storage] with memoized results.

pub mod common;
pub mod config;
pub mod graph;
pub mod math;
pub mod orientation;
pub mod session;
pub mod solver;
pub mod storage;

#[cfg(test)]
mod test_utils;

pub use crate::common::{
    BoardId, Component, ComponentId, EdgeId, EdgeSource, Image, ImageId, Location, Net, NetId,
    Node, OverlapEdge, PathResult, Point, PointPair, ProjectedComponent,
};
pub use crate::config::{load_params, ConfigError, LabelParams, MatchParams, RegistrationParams};
pub use crate::graph::{invert_h, solve_paths, ImageGraph};
pub use crate::math::{invert, multiply, project, Degree, Homography};
pub use crate::session::{BoardSession, SessionCache};
pub use crate::storage::{MemoryStore, Storage, StorageError};
