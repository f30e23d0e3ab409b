//! Record store seam.
//!
//! The registration core only reads: [Storage] is the read interface it needs.
//! [MemoryStore] implements it in memory and adds the write path the
//! annotation layer uses (add/replace overlaps, guarded image deletion).

use std::collections::BTreeMap;

use image::DynamicImage;
use log::warn;
use thiserror::Error;

use crate::common::{BoardId, Component, Image, ImageId, Net, OverlapEdge};

/// Storage failures. Degenerate geometry is never reported here.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("image not found: {0}")]
    ImageNotFound(ImageId),
    #[error("image {0} is the primary location of component {1}")]
    ImageInUse(ImageId, String),
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Snapshot reads of whole records.
pub trait Storage {
    fn overlap_edges(&self) -> Result<Vec<OverlapEdge>, StorageError>;
    fn image(&self, id: &ImageId) -> Result<Option<Image>, StorageError>;
    /// Encoded raster of an image, if stored.
    fn image_raster(&self, id: &ImageId) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.image(id)?.map(|img| img.raster))
    }
    fn images_for_board(&self, board: &BoardId) -> Result<Vec<Image>, StorageError>;
    fn components_for_board(&self, board: &BoardId) -> Result<Vec<Component>, StorageError>;
    fn nets_for_board(&self, board: &BoardId) -> Result<Vec<Net>, StorageError>;
}

/// Fetches and decodes an image's raster. `None` when the image or its
/// raster is missing or the bytes do not decode.
pub fn decode_image<S: Storage + ?Sized>(
    storage: &S,
    id: &ImageId,
) -> Result<Option<DynamicImage>, StorageError> {
    let Some(bytes) = storage.image_raster(id)? else {
        return Ok(None);
    };
    match image::load_from_memory(&bytes) {
        Ok(img) => Ok(Some(img)),
        Err(e) => {
            warn!("image {id}: raster does not decode: {e}");
            Ok(None)
        }
    }
}

/// In-memory record store, keyed by id. Iteration order is insertion order
/// for images and id order for everything else.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    images: Vec<Image>,
    overlaps: BTreeMap<String, OverlapEdge>,
    components: BTreeMap<String, Component>,
    nets: BTreeMap<String, Net>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an image by id.
    pub fn add_image(&mut self, image: Image) {
        match self.images.iter_mut().find(|i| i.id == image.id) {
            Some(slot) => *slot = image,
            None => self.images.push(image),
        }
    }

    pub fn rename_image(&mut self, id: &ImageId, name: impl Into<String>) -> Result<(), StorageError> {
        let image = self
            .images
            .iter_mut()
            .find(|i| &i.id == id)
            .ok_or_else(|| StorageError::ImageNotFound(id.clone()))?;
        image.name = name.into();
        Ok(())
    }

    /// Removes an image unless a component uses it as primary location.
    /// Overlap edges touching the image go with it.
    pub fn delete_image(&mut self, id: &ImageId) -> Result<Image, StorageError> {
        if let Some(c) = self
            .components
            .values()
            .find(|c| c.location.as_ref().is_some_and(|l| &l.img_id == id))
        {
            return Err(StorageError::ImageInUse(id.clone(), c.label.clone()));
        }
        let idx = self
            .images
            .iter()
            .position(|i| &i.id == id)
            .ok_or_else(|| StorageError::ImageNotFound(id.clone()))?;
        self.overlaps.retain(|_, e| !e.touches(id));
        Ok(self.images.remove(idx))
    }

    /// Stores `edge`, dropping any earlier registration of the same pair.
    pub fn add_overlap(&mut self, edge: OverlapEdge) {
        self.delete_overlaps_for_pair(&edge.from_image_id, &edge.to_image_id);
        self.overlaps.insert(edge.id.to_string(), edge);
    }

    pub fn overlap_for_pair(&self, a: &ImageId, b: &ImageId) -> Option<&OverlapEdge> {
        self.overlaps.values().find(|e| e.connects(a, b))
    }

    pub fn delete_overlaps_for_pair(&mut self, a: &ImageId, b: &ImageId) -> usize {
        let before = self.overlaps.len();
        self.overlaps.retain(|_, e| !e.connects(a, b));
        before - self.overlaps.len()
    }

    pub fn add_component(&mut self, component: Component) {
        self.components.insert(component.id.to_string(), component);
    }

    pub fn add_net(&mut self, net: Net) {
        self.nets.insert(net.id.to_string(), net);
    }
}

impl Storage for MemoryStore {
    fn overlap_edges(&self) -> Result<Vec<OverlapEdge>, StorageError> {
        Ok(self.overlaps.values().cloned().collect())
    }

    fn image(&self, id: &ImageId) -> Result<Option<Image>, StorageError> {
        Ok(self.images.iter().find(|i| &i.id == id).cloned())
    }

    fn images_for_board(&self, board: &BoardId) -> Result<Vec<Image>, StorageError> {
        Ok(self
            .images
            .iter()
            .filter(|i| &i.board_id == board)
            .cloned()
            .collect())
    }

    fn components_for_board(&self, board: &BoardId) -> Result<Vec<Component>, StorageError> {
        Ok(self
            .components
            .values()
            .filter(|c| &c.board_id == board)
            .cloned()
            .collect())
    }

    fn nets_for_board(&self, board: &BoardId) -> Result<Vec<Net>, StorageError> {
        Ok(self
            .nets
            .values()
            .filter(|n| &n.board_id == board)
            .cloned()
            .collect())
    }
}
