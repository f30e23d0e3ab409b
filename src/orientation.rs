//! Orientation and pin-labeling heuristics.
//!
//! These rules are empirical. Two-pin passives are assumed to be placed
//! roughly axis-aligned with pin 1 on the left when the top side is viewed;
//! the back side mirrors that. The comparison directions below were tuned on
//! real boards; keep them as they are.

use std::collections::{HashMap, HashSet, VecDeque};

use log::debug;

use crate::common::{Component, ImageId, Net, Node, OverlapEdge, Point, ProjectedComponent};
use crate::config::LabelParams;
use crate::math::Degree;

/// Splits `R12.1` into `("R12", "1")`. Labels with more or fewer dots are
/// not pin labels.
pub fn split_pin_label(label: &str) -> Option<(&str, &str)> {
    let mut parts = label.split('.');
    let reference = parts.next()?;
    let pin = parts.next()?;
    match parts.next() {
        Some(_) => None,
        None => Some((reference, pin)),
    }
}

/// Leading uppercase letters of a reference designator (`VD3` → `VD`).
pub fn reference_prefix(reference: &str) -> Option<&str> {
    let end = reference
        .find(|c: char| !c.is_ascii_uppercase())
        .unwrap_or(reference.len());
    (end > 0).then(|| &reference[..end])
}

/// Resistor pin labels `R<digits>.1` / `R<digits>.2`.
fn resistor_pin(label: &str) -> Option<(&str, u8)> {
    let (reference, pin) = split_pin_label(label)?;
    let digits = reference.strip_prefix('R')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    match pin {
        "1" => Some((reference, 1)),
        "2" => Some((reference, 2)),
        _ => None,
    }
}

/// Node offset from its component's anchor, if the component with reference
/// `reference` is stored on the node's own image.
fn offset_from_component(components: &[Component], reference: &str, node: &Node) -> Option<Point> {
    let component = components.iter().find(|c| c.label == reference)?;
    let location = component.location.as_ref()?;
    if location.img_id != node.img_id {
        return None;
    }
    Some(Point::new(node.x - location.x, node.y - location.y))
}

/// Rotates `v` by `-rotation`. Returns `(dx, dy)` in the board's axis frame.
fn unrotate(v: Point, rotation: Degree) -> (f64, f64) {
    let (sin, cos) = (-rotation.radians()).sin_cos();
    (v.x * cos - v.y * sin, v.x * sin + v.y * cos)
}

/// Average tilt of the board in the photos, estimated from annotated pins of
/// two-pin passives. Zero when there is no usable sample.
pub fn calculate_global_rotation(
    components: &[Component],
    nets: &[Net],
    params: &LabelParams,
) -> Degree {
    let mut total = 0.0;
    let mut count = 0usize;

    for node in nets.iter().flat_map(|n| &n.nodes) {
        let Some((reference, _)) = split_pin_label(&node.label) else {
            continue;
        };
        let trusted = reference_prefix(reference)
            .is_some_and(|prefix| params.safe_prefixes.iter().any(|p| p == prefix));
        if !trusted {
            continue;
        }
        let Some(offset) = offset_from_component(components, reference, node) else {
            continue;
        };

        let deviation = Degree::from_radians(offset.y.atan2(offset.x))
            .axis_deviation()
            .degrees();
        if deviation.abs() < params.rotation_outlier_deg {
            total += deviation;
            count += 1;
        }
    }

    if count == 0 {
        return Degree::default();
    }
    debug!("global rotation from {count} pin samples");
    Degree::new(total / count as f64)
}

/// Assigns +1/-1 to every image reachable from the first of `images`,
/// flipping sign across mirroring edges. Unreached images get no polarity.
fn propagate_polarity(images: &[ImageId], edges: &[OverlapEdge]) -> HashMap<ImageId, i8> {
    let mut polarity: HashMap<ImageId, i8> = HashMap::new();
    let Some(start) = images.first() else {
        return polarity;
    };

    let known: HashSet<&ImageId> = images.iter().collect();
    let mut adjacency: HashMap<&ImageId, Vec<(&ImageId, bool)>> = HashMap::new();
    for edge in edges {
        if !known.contains(&edge.from_image_id) || !known.contains(&edge.to_image_id) {
            continue;
        }
        let flip = edge.homography().is_reflection();
        adjacency
            .entry(&edge.from_image_id)
            .or_default()
            .push((&edge.to_image_id, flip));
        adjacency
            .entry(&edge.to_image_id)
            .or_default()
            .push((&edge.from_image_id, flip));
    }

    let mut queue = VecDeque::from([start]);
    polarity.insert(start.clone(), 1);
    while let Some(curr) = queue.pop_front() {
        let sign = polarity[curr];
        for &(next, flip) in adjacency.get(curr).into_iter().flatten() {
            if polarity.contains_key(next) {
                continue;
            }
            polarity.insert(next.clone(), if flip { -sign } else { sign });
            queue.push_back(next);
        }
    }
    polarity
}

/// Which photographs show the back of the board.
///
/// Images registered with the first image are split into two mirror groups
/// by polarity propagation; images outside that cluster belong to neither
/// group and are never reported. Resistor pin annotations then vote on which
/// group is the top side; without votes the smaller group is taken to be the
/// back.
pub fn detect_back_images(
    images: &[ImageId],
    edges: &[OverlapEdge],
    components: &[Component],
    nets: &[Net],
    rotation: Degree,
) -> HashSet<ImageId> {
    let polarity = propagate_polarity(images, edges);
    let group_a: HashSet<ImageId> = images
        .iter()
        .filter(|id| polarity.get(*id) == Some(&1))
        .cloned()
        .collect();
    let group_b: HashSet<ImageId> = images
        .iter()
        .filter(|id| polarity.get(*id) == Some(&-1))
        .cloned()
        .collect();

    // positive: group A is the top side
    let mut score_a = 0i64;
    for node in nets.iter().flat_map(|n| &n.nodes) {
        let Some((reference, pin)) = resistor_pin(&node.label) else {
            continue;
        };
        let Some(offset) = offset_from_component(components, reference, node) else {
            continue;
        };
        let (rdx, _) = unrotate(offset, rotation);
        let top_behavior = if pin == 1 { rdx < 0.0 } else { rdx > 0.0 };
        let vote = if top_behavior { 1 } else { -1 };
        if group_a.contains(&node.img_id) {
            score_a += vote;
        } else if group_b.contains(&node.img_id) {
            score_a -= vote;
        }
    }

    debug!(
        "back-side detection: groups {}/{}, vote {score_a}",
        group_a.len(),
        group_b.len()
    );
    if score_a != 0 {
        return if score_a > 0 { group_b } else { group_a };
    }

    if group_b.is_empty() || group_a.is_empty() {
        HashSet::new()
    } else if group_a.len() <= group_b.len() {
        group_a
    } else {
        group_b
    }
}

/// Whether `label` is already used by a node of any net in `nets`.
pub fn label_in_use(nets: &[Net], label: &str) -> bool {
    nets.iter().flat_map(|n| &n.nodes).any(|n| n.label == label)
}

/// Suggests a pin label (`R5.1`) for a click at `click`.
///
/// Candidates within the hit radius are scored by distance, penalised for
/// deviating from the board axes. The pin number follows a quadrant rule that
/// is mirrored on back-side images; when the preferred label is taken the
/// other pin is offered.
pub fn suggest_label(
    click: Point,
    components: &[ProjectedComponent],
    rotation: Degree,
    is_back: bool,
    nets: &[Net],
    params: &LabelParams,
) -> Option<String> {
    let mut best: Option<(&ProjectedComponent, f64)> = None;
    for c in components {
        let offset = Point::new(click.x - c.position.x, click.y - c.position.y);
        let dist = offset.x.hypot(offset.y);
        if dist >= params.hit_radius_px {
            continue;
        }
        let (rdx, rdy) = unrotate(offset, rotation);
        let angle = Degree::from_radians(rdy.atan2(rdx)).degrees().abs() % 90.0;
        let deviation = angle.min(90.0 - angle);
        let score = dist * (1.0 + deviation * params.deviation_weight);
        if best.map_or(true, |(_, min)| score < min) {
            best = Some((c, score));
        }
    }
    let (component, _) = best?;

    let offset = Point::new(click.x - component.position.x, click.y - component.position.y);
    let (rdx, rdy) = unrotate(offset, rotation);
    let pin_one = if is_back {
        rdx - rdy > 0.0
    } else {
        rdx + rdy < 0.0
    };
    let (primary, secondary) = if pin_one { (1, 2) } else { (2, 1) };

    let label = format!("{}.{primary}", component.label);
    if label_in_use(nets, &label) {
        Some(format!("{}.{secondary}", component.label))
    } else {
        Some(label)
    }
}
