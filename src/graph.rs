//! Registration graph over stored overlap edges.
//!
//! Every [OverlapEdge] contributes two arcs: its homography forward and its
//! stored inverse backward. [ImageGraph::solve_paths] runs Dijkstra from one
//! image and composes homographies along the cheapest path to every image it
//! can reach. Costs are a blunt trust preference: any chain of manual edges
//! beats a single automatic one.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};

use log::debug;

use crate::common::{ImageId, OverlapEdge, PathResult};
use crate::math::{invert, multiply, Homography};

pub const MANUAL_EDGE_COST: u32 = 1;
pub const AUTOMATIC_EDGE_COST: u32 = 1000;

pub fn edge_cost(edge: &OverlapEdge) -> u32 {
    if edge.is_manual() {
        MANUAL_EDGE_COST
    } else {
        AUTOMATIC_EDGE_COST
    }
}

#[derive(Debug, Clone)]
struct Hop {
    to: ImageId,
    h: Homography,
    cost: u32,
}

/// Adjacency lists rebuilt from a flat edge list.
#[derive(Debug, Clone, Default)]
pub struct ImageGraph {
    adjacency: HashMap<ImageId, Vec<Hop>>,
}

/// Frontier entry. Ordered so the max-heap pops the lowest cost first and,
/// among equal costs, the earliest pushed.
struct Candidate {
    cost: u32,
    seq: u64,
    id: ImageId,
    h: Homography,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Candidate {}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl ImageGraph {
    pub fn from_edges<'a>(edges: impl IntoIterator<Item = &'a OverlapEdge>) -> Self {
        let mut adjacency: HashMap<ImageId, Vec<Hop>> = HashMap::new();
        for edge in edges {
            let cost = edge_cost(edge);
            adjacency
                .entry(edge.from_image_id.clone())
                .or_default()
                .push(Hop {
                    to: edge.to_image_id.clone(),
                    h: *edge.homography(),
                    cost,
                });
            adjacency
                .entry(edge.to_image_id.clone())
                .or_default()
                .push(Hop {
                    to: edge.from_image_id.clone(),
                    h: *edge.inverse_homography(),
                    cost,
                });
        }
        Self { adjacency }
    }

    /// Cheapest path from `start` to every reachable image.
    ///
    /// Each result's `h` maps `start` pixels into that image. `start` itself
    /// and unreachable images are absent. Results come out in finalization
    /// order (ascending cost).
    pub fn solve_paths(&self, start: &ImageId) -> Vec<PathResult> {
        let mut results = Vec::new();
        let mut visited: HashSet<&ImageId> = HashSet::new();
        let mut frontier = BinaryHeap::new();
        let mut seq = 0u64;
        frontier.push(Candidate {
            cost: 0,
            seq,
            id: start.clone(),
            h: Homography::IDENTITY,
        });

        while let Some(curr) = frontier.pop() {
            let Some((id, hops)) = self.adjacency.get_key_value(&curr.id) else {
                // isolated start image
                continue;
            };
            if !visited.insert(id) {
                continue;
            }
            if id != start {
                results.push(PathResult {
                    id: id.clone(),
                    h: curr.h,
                    total_cost: curr.cost,
                });
            }

            for hop in hops {
                if visited.contains(&hop.to) {
                    continue;
                }
                seq += 1;
                frontier.push(Candidate {
                    cost: curr.cost + hop.cost,
                    seq,
                    id: hop.to.clone(),
                    h: multiply(&hop.h, &curr.h),
                });
            }
        }

        debug!(
            "solve_paths from {start}: {} of {} images reachable",
            results.len(),
            self.adjacency.len().saturating_sub(1)
        );
        results
    }
}

/// Builds the graph from `edges` and solves from `start`.
pub fn solve_paths(edges: &[OverlapEdge], start: &ImageId) -> Vec<PathResult> {
    ImageGraph::from_edges(edges).solve_paths(start)
}

/// Flips a path result's direction (target→remote into remote→target).
pub fn invert_h(h: &Homography) -> Option<Homography> {
    invert(h)
}
