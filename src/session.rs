//! Board-scoped queries over a [Storage] with memoized results.
//!
//! A [BoardSession] answers the questions the annotation layer asks on every
//! click: where are the board's components in this photo, which photos show
//! the back, what label should this pin get. Derived results are cached in a
//! [SessionCache]; the write path must call the matching `*_changed` method
//! after mutating storage.

use std::collections::{HashMap, HashSet};

use log::debug;

use crate::common::{BoardId, ImageId, Net, Point, ProjectedComponent};
use crate::config::RegistrationParams;
use crate::graph::{invert_h, solve_paths};
use crate::math::{Degree, Homography};
use crate::orientation::{calculate_global_rotation, detect_back_images, suggest_label};
use crate::storage::{decode_image, Storage, StorageError};

/// An image reachable from some target, with the matrix that maps its pixels
/// into the target.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectedImage {
    pub image_id: ImageId,
    pub to_target: Homography,
    pub total_cost: u32,
}

/// A net node drawn on some image.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMarker {
    pub label: String,
    pub position: Point,
    /// Node stored on this image rather than projected onto it
    pub source: bool,
}

/// Where a point on one image lands on another.
#[derive(Debug, Clone, PartialEq)]
pub struct PointView {
    pub image_id: ImageId,
    pub position: Point,
    /// Inside the image's pixel bounds. `false` when its size is unknown.
    pub inside: bool,
}

/// Memoized query results.
#[derive(Debug, Default)]
pub struct SessionCache {
    projected: HashMap<ImageId, Vec<ProjectedComponent>>,
    back_images: Option<HashSet<ImageId>>,
    resolutions: HashMap<ImageId, (u32, u32)>,
}

impl SessionCache {
    /// Drops everything derived from edges, components or nets.
    pub fn invalidate(&mut self) {
        debug!(
            "session cache invalidated ({} projections)",
            self.projected.len()
        );
        self.projected.clear();
        self.back_images = None;
    }

    /// Also drops decoded image sizes.
    pub fn clear(&mut self) {
        self.invalidate();
        self.resolutions.clear();
    }
}

pub struct BoardSession<S> {
    storage: S,
    board: BoardId,
    params: RegistrationParams,
    cache: SessionCache,
}

impl<S: Storage> BoardSession<S> {
    pub fn new(storage: S, board: BoardId, params: RegistrationParams) -> Self {
        Self {
            storage,
            board,
            params,
            cache: SessionCache::default(),
        }
    }

    pub fn board(&self) -> &BoardId {
        &self.board
    }

    pub fn params(&self) -> &RegistrationParams {
        &self.params
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Mutable access to the store. Call the matching `*_changed` method
    /// afterwards.
    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }

    pub fn cache_mut(&mut self) -> &mut SessionCache {
        &mut self.cache
    }

    pub fn edges_changed(&mut self) {
        self.cache.invalidate();
    }

    pub fn components_changed(&mut self) {
        self.cache.invalidate();
    }

    pub fn nets_changed(&mut self) {
        self.cache.invalidate();
    }

    pub fn images_changed(&mut self) {
        self.cache.clear();
    }

    /// Every image reachable from `target`, cheapest path first.
    pub fn connected_images(&self, target: &ImageId) -> Result<Vec<ConnectedImage>, StorageError> {
        let edges = self.storage.overlap_edges()?;
        Ok(solve_paths(&edges, target)
            .into_iter()
            .filter_map(|p| {
                Some(ConnectedImage {
                    to_target: invert_h(&p.h)?,
                    image_id: p.id,
                    total_cost: p.total_cost,
                })
            })
            .collect())
    }

    /// The board's placed components in `target`'s coordinates.
    ///
    /// Components stored on `target` keep their coordinates. Others are
    /// carried over through the registration graph; projections landing
    /// absurdly far outside the image are dropped.
    pub fn projected_components(
        &mut self,
        target: &ImageId,
    ) -> Result<Vec<ProjectedComponent>, StorageError> {
        if let Some(hit) = self.cache.projected.get(target) {
            return Ok(hit.clone());
        }

        let to_target: HashMap<ImageId, Homography> = self
            .connected_images(target)?
            .into_iter()
            .map(|c| (c.image_id, c.to_target))
            .collect();
        let bound = self.params.labels.projection_bound;

        let mut projected = Vec::new();
        for c in self.storage.components_for_board(&self.board)? {
            let Some(loc) = &c.location else {
                continue;
            };
            let (position, direct) = if &loc.img_id == target {
                (loc.point(), true)
            } else {
                let Some(p) = to_target.get(&loc.img_id).and_then(|h| h.project(loc.x, loc.y)) else {
                    continue;
                };
                (p, false)
            };
            if position.x.abs() >= bound || position.y.abs() >= bound {
                continue;
            }
            projected.push(ProjectedComponent {
                id: c.id.clone(),
                label: c.label.clone(),
                position,
                direct,
            });
        }

        debug!("projected {} components onto {target}", projected.len());
        self.cache.projected.insert(target.clone(), projected.clone());
        Ok(projected)
    }

    /// Markers for `net`'s nodes on each of the `visible` images.
    pub fn project_net(
        &self,
        net: &Net,
        visible: &[ImageId],
    ) -> Result<HashMap<ImageId, Vec<NodeMarker>>, StorageError> {
        let edges = self.storage.overlap_edges()?;
        let bound = self.params.labels.projection_bound;
        let mut paths_from: HashMap<&ImageId, HashMap<ImageId, Homography>> = HashMap::new();
        let mut markers: HashMap<ImageId, Vec<NodeMarker>> = visible
            .iter()
            .map(|id| (id.clone(), Vec::new()))
            .collect();

        for node in &net.nodes {
            let paths = paths_from.entry(&node.img_id).or_insert_with(|| {
                solve_paths(&edges, &node.img_id)
                    .into_iter()
                    .map(|p| (p.id, p.h))
                    .collect()
            });
            for view in visible {
                let (position, source) = if view == &node.img_id {
                    (node.point(), true)
                } else {
                    let Some(p) = paths.get(view).and_then(|h| h.project(node.x, node.y)) else {
                        continue;
                    };
                    (p, false)
                };
                if position.x.abs() >= bound || position.y.abs() >= bound {
                    continue;
                }
                if let Some(list) = markers.get_mut(view) {
                    list.push(NodeMarker {
                        label: node.label.clone(),
                        position,
                        source,
                    });
                }
            }
        }
        Ok(markers)
    }

    /// Decoded pixel size of an image. `None` when it has no decodable raster.
    pub fn image_resolution(&mut self, id: &ImageId) -> Result<Option<(u32, u32)>, StorageError> {
        if let Some(size) = self.cache.resolutions.get(id) {
            return Ok(Some(*size));
        }
        let Some(img) = decode_image(&self.storage, id)? else {
            return Ok(None);
        };
        let size = (img.width(), img.height());
        self.cache.resolutions.insert(id.clone(), size);
        Ok(Some(size))
    }

    /// Where `point` on `image` appears in every connected image.
    pub fn point_views(&mut self, image: &ImageId, point: Point) -> Result<Vec<PointView>, StorageError> {
        let edges = self.storage.overlap_edges()?;
        let mut views = Vec::new();
        for path in solve_paths(&edges, image) {
            let Some(position) = path.h.project(point.x, point.y) else {
                continue;
            };
            let inside = self.image_resolution(&path.id)?.is_some_and(|(w, h)| {
                position.x >= 0.0
                    && position.y >= 0.0
                    && position.x <= w as f64
                    && position.y <= h as f64
            });
            views.push(PointView {
                image_id: path.id,
                position,
                inside,
            });
        }
        Ok(views)
    }

    /// Initial pair of images to show side by side.
    ///
    /// Images are classed as top or bottom by name. The registered top/bottom
    /// pair with the most pixels wins; otherwise the largest of each class.
    /// Remaining slots (up to two) are filled in board order.
    pub fn best_top_bottom_pair(&mut self) -> Result<Vec<ImageId>, StorageError> {
        let images = self.storage.images_for_board(&self.board)?;
        let (mut tops, mut bottoms, mut others) = (Vec::new(), Vec::new(), Vec::new());
        for img in images {
            let name = img.name.to_lowercase();
            if name.contains("top") || name.contains("front") {
                tops.push(img.id);
            } else if name.contains("bot") || name.contains("back") {
                bottoms.push(img.id);
            } else {
                others.push(img.id);
            }
        }

        let edges = self.storage.overlap_edges()?;
        let mut best: Option<(ImageId, ImageId)> = None;
        let mut best_px = 0u64;
        if !bottoms.is_empty() {
            for top in &tops {
                let reachable: HashSet<ImageId> =
                    solve_paths(&edges, top).into_iter().map(|p| p.id).collect();
                let top_px = self.pixel_count(top)?;
                for bottom in &bottoms {
                    if !reachable.contains(bottom) {
                        continue;
                    }
                    let total = top_px + self.pixel_count(bottom)?;
                    if total > best_px {
                        best_px = total;
                        best = Some((top.clone(), bottom.clone()));
                    }
                }
            }
        }

        let mut selection = match best {
            Some((top, bottom)) => vec![top, bottom],
            None => [self.largest(&tops)?, self.largest(&bottoms)?]
                .into_iter()
                .flatten()
                .collect(),
        };
        for id in tops.iter().chain(&bottoms).chain(&others) {
            if selection.len() >= 2 {
                break;
            }
            if !selection.contains(id) {
                selection.push(id.clone());
            }
        }
        Ok(selection)
    }

    fn pixel_count(&mut self, id: &ImageId) -> Result<u64, StorageError> {
        Ok(self
            .image_resolution(id)?
            .map_or(0, |(w, h)| w as u64 * h as u64))
    }

    /// Largest image of `ids`, the first one when none has a known size.
    fn largest(&mut self, ids: &[ImageId]) -> Result<Option<ImageId>, StorageError> {
        let mut best = ids.first();
        let mut best_px = 0;
        for id in ids {
            let px = self.pixel_count(id)?;
            if px > best_px {
                best_px = px;
                best = Some(id);
            }
        }
        Ok(best.cloned())
    }

    pub fn global_rotation(&self) -> Result<Degree, StorageError> {
        let components = self.storage.components_for_board(&self.board)?;
        let nets = self.storage.nets_for_board(&self.board)?;
        Ok(calculate_global_rotation(
            &components,
            &nets,
            &self.params.labels,
        ))
    }

    /// Images of this board that show its back side.
    pub fn back_images(&mut self) -> Result<HashSet<ImageId>, StorageError> {
        if let Some(hit) = &self.cache.back_images {
            return Ok(hit.clone());
        }
        let images: Vec<ImageId> = self
            .storage
            .images_for_board(&self.board)?
            .into_iter()
            .map(|i| i.id)
            .collect();
        let edges = self.storage.overlap_edges()?;
        let components = self.storage.components_for_board(&self.board)?;
        let nets = self.storage.nets_for_board(&self.board)?;
        let rotation = calculate_global_rotation(&components, &nets, &self.params.labels);

        let back = detect_back_images(&images, &edges, &components, &nets, rotation);
        self.cache.back_images = Some(back.clone());
        Ok(back)
    }

    /// Pin label to offer for a click at `click` on `image`.
    pub fn suggested_label(
        &mut self,
        image: &ImageId,
        click: Point,
    ) -> Result<Option<String>, StorageError> {
        let projected = self.projected_components(image)?;
        let is_back = self.back_images()?.contains(image);
        let rotation = self.global_rotation()?;
        let nets = self.storage.nets_for_board(&self.board)?;
        Ok(suggest_label(
            click,
            &projected,
            rotation,
            is_back,
            &nets,
            &self.params.labels,
        ))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::{Component, ComponentId, Image, Location, Node};
    use crate::storage::MemoryStore;
    use crate::test_utils::{dot_image, manual_edge, png_bytes};
    use approx::assert_abs_diff_eq;

    const MIRROR: [f64; 9] = [-1.0, 0.0, 100.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

    fn image(id: &str, name: &str, w: u32, h: u32) -> Image {
        Image {
            id: id.into(),
            board_id: "board".into(),
            name: name.to_string(),
            raster: png_bytes(&dot_image(w, h, &[])),
        }
    }

    fn component(id: &str, label: &str, img: &str, x: f64, y: f64) -> Component {
        Component {
            id: ComponentId::new(id),
            board_id: "board".into(),
            label: label.to_string(),
            value: String::new(),
            description: String::new(),
            location: Some(Location {
                img_id: img.into(),
                x,
                y,
            }),
        }
    }

    fn node(img: &str, x: f64, y: f64, label: &str) -> Node {
        Node {
            img_id: img.into(),
            x,
            y,
            label: label.to_string(),
        }
    }

    fn net(nodes: Vec<Node>) -> Net {
        Net {
            id: "n1".into(),
            board_id: "board".into(),
            name: "GND".to_string(),
            nodes,
        }
    }

    /// top (100x80), bottom (120x90, mirrored), zoom (50x50, offset detail)
    fn session() -> BoardSession<MemoryStore> {
        let mut store = MemoryStore::new();
        store.add_image(image("top", "Board TOP.jpg", 100, 80));
        store.add_image(image("bottom", "board bottom.jpg", 120, 90));
        store.add_image(image("zoom", "detail.jpg", 50, 50));
        store.add_overlap(manual_edge("top", "zoom", &Homography::translation(-10.0, -20.0)));
        store.add_overlap(manual_edge("top", "bottom", &Homography::from_row_major(MIRROR)));
        store.add_component(component("c-r1", "R1", "top", 40.0, 30.0));
        store.add_component(component("c-c1", "C1", "zoom", 40.0, 40.0));
        BoardSession::new(store, "board".into(), RegistrationParams::default())
    }

    fn by_label<'a>(list: &'a [ProjectedComponent], label: &str) -> &'a ProjectedComponent {
        list.iter().find(|c| c.label == label).unwrap()
    }

    #[test]
    fn projects_direct_and_remote_components() {
        let mut session = session();
        let on_top = session.projected_components(&"top".into()).unwrap();
        assert_eq!(on_top.len(), 2);
        let r1 = by_label(&on_top, "R1");
        assert!(r1.direct);
        assert_eq!(r1.position, Point::new(40.0, 30.0));
        let c1 = by_label(&on_top, "C1");
        assert!(!c1.direct);
        assert_abs_diff_eq!(c1.position.x, 50.0, epsilon = 1e-6);
        assert_abs_diff_eq!(c1.position.y, 60.0, epsilon = 1e-6);

        let on_bottom = session.projected_components(&"bottom".into()).unwrap();
        let r1 = by_label(&on_bottom, "R1");
        assert_abs_diff_eq!(r1.position.x, 60.0, epsilon = 1e-6);
        assert_abs_diff_eq!(r1.position.y, 30.0, epsilon = 1e-6);
    }

    #[test]
    fn cache_serves_until_edges_change() {
        let mut session = session();
        session
            .storage_mut()
            .add_image(image("side", "side.jpg", 10, 10));
        session
            .storage_mut()
            .add_component(component("c-d1", "D1", "side", 1.0, 1.0));
        session.images_changed();
        assert_eq!(session.projected_components(&"top".into()).unwrap().len(), 2);

        session
            .storage_mut()
            .add_overlap(manual_edge("side", "top", &Homography::translation(5.0, 5.0)));
        assert_eq!(session.projected_components(&"top".into()).unwrap().len(), 2);

        session.edges_changed();
        let on_top = session.projected_components(&"top".into()).unwrap();
        assert_eq!(on_top.len(), 3);
        let d1 = by_label(&on_top, "D1");
        assert_abs_diff_eq!(d1.position.x, 6.0, epsilon = 1e-6);
        assert_abs_diff_eq!(d1.position.y, 6.0, epsilon = 1e-6);
    }

    #[test]
    fn far_projections_are_dropped() {
        let mut session = session();
        session
            .storage_mut()
            .add_overlap(manual_edge("zoom", "far", &Homography::translation(60_000.0, 0.0)));
        session.edges_changed();
        assert!(session.projected_components(&"far".into()).unwrap().is_empty());
    }

    #[test]
    fn point_views_check_bounds() {
        let mut session = session();
        let views = session
            .point_views(&"top".into(), Point::new(95.0, 75.0))
            .unwrap();
        assert_eq!(views.len(), 2);
        let zoom = views.iter().find(|v| v.image_id.as_str() == "zoom").unwrap();
        assert_abs_diff_eq!(zoom.position.x, 85.0, epsilon = 1e-6);
        assert!(!zoom.inside);
        let bottom = views.iter().find(|v| v.image_id.as_str() == "bottom").unwrap();
        assert_abs_diff_eq!(bottom.position.x, 5.0, epsilon = 1e-6);
        assert!(bottom.inside);

        assert_eq!(session.image_resolution(&"bottom".into()).unwrap(), Some((120, 90)));
        assert_eq!(session.image_resolution(&"missing".into()).unwrap(), None);
    }

    #[test]
    fn resolution_is_memoized_until_images_change() {
        let mut session = session();
        assert_eq!(session.image_resolution(&"zoom".into()).unwrap(), Some((50, 50)));

        session
            .storage_mut()
            .add_image(image("zoom", "detail.jpg", 20, 10));
        assert_eq!(session.image_resolution(&"zoom".into()).unwrap(), Some((50, 50)));

        session.edges_changed();
        assert_eq!(session.image_resolution(&"zoom".into()).unwrap(), Some((50, 50)));

        session.images_changed();
        assert_eq!(session.image_resolution(&"zoom".into()).unwrap(), Some((20, 10)));
    }

    #[test]
    fn connected_images_map_into_target() {
        let session = session();
        let connected = session.connected_images(&"zoom".into()).unwrap();
        let ids: HashSet<&str> = connected.iter().map(|c| c.image_id.as_str()).collect();
        assert_eq!(ids, HashSet::from(["top", "bottom"]));
        let top = connected.iter().find(|c| c.image_id.as_str() == "top").unwrap();
        assert_eq!(top.total_cost, 1);
        let p = top.to_target.project(10.0, 20.0).unwrap();
        assert_abs_diff_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_abs_diff_eq!(p.y, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn picks_registered_top_bottom_pair() {
        let mut session = session();
        session
            .storage_mut()
            .add_image(image("front2", "front overview.jpg", 200, 200));
        session.images_changed();
        let pair = session.best_top_bottom_pair().unwrap();
        assert_eq!(pair, vec![ImageId::new("top"), ImageId::new("bottom")]);

        session
            .storage_mut()
            .delete_overlaps_for_pair(&"top".into(), &"bottom".into());
        session.edges_changed();
        let pair = session.best_top_bottom_pair().unwrap();
        assert_eq!(pair, vec![ImageId::new("front2"), ImageId::new("bottom")]);
    }

    #[test]
    fn mirrored_image_is_back_side() {
        let mut session = session();
        let back = session.back_images().unwrap();
        assert_eq!(back, HashSet::from([ImageId::new("bottom")]));
    }

    #[test]
    fn suggests_pins_per_side() {
        let mut session = session();
        assert_eq!(
            session
                .suggested_label(&"top".into(), Point::new(20.0, 30.0))
                .unwrap()
                .as_deref(),
            Some("R1.1")
        );
        assert_eq!(
            session
                .suggested_label(&"bottom".into(), Point::new(40.0, 30.0))
                .unwrap()
                .as_deref(),
            Some("R1.2")
        );
        assert_eq!(
            session
                .suggested_label(&"top".into(), Point::new(400.0, 400.0))
                .unwrap(),
            None
        );

        session
            .storage_mut()
            .add_net(net(vec![node("top", 20.0, 30.0, "R1.1")]));
        session.nets_changed();
        assert_eq!(
            session
                .suggested_label(&"top".into(), Point::new(20.0, 30.0))
                .unwrap()
                .as_deref(),
            Some("R1.2")
        );
        assert_abs_diff_eq!(session.global_rotation().unwrap().degrees(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn net_nodes_projected_onto_visible_images() {
        let session = session();
        let gnd = net(vec![node("top", 20.0, 30.0, "R1.1")]);
        let visible: Vec<ImageId> = vec!["top".into(), "zoom".into(), "bottom".into()];
        let markers = session.project_net(&gnd, &visible).unwrap();

        let top = &markers[&ImageId::new("top")];
        assert_eq!(top.len(), 1);
        assert!(top[0].source);
        assert_eq!(top[0].position, Point::new(20.0, 30.0));

        let zoom = &markers[&ImageId::new("zoom")][0];
        assert!(!zoom.source);
        assert_eq!(zoom.label, "R1.1");
        assert_abs_diff_eq!(zoom.position.x, 10.0, epsilon = 1e-6);
        assert_abs_diff_eq!(zoom.position.y, 10.0, epsilon = 1e-6);

        let bottom = &markers[&ImageId::new("bottom")][0];
        assert_abs_diff_eq!(bottom.position.x, 80.0, epsilon = 1e-6);
    }
}
