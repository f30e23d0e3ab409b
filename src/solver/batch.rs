//! Automatic registration of one image against a set of others.

use log::{debug, warn};

use crate::common::{ImageId, OverlapEdge};
use crate::config::MatchParams;
use crate::solver::common::FeatureMatcher;
use crate::solver::correspondence::{extract_features, find_homography};
use crate::storage::{decode_image, Storage, StorageError};

/// Reported before each pair is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based position in the batch
    pub index: usize,
    pub total: usize,
    pub image_id: ImageId,
}

/// Registers `source` against every image in `others`.
///
/// Source features are extracted once. Pairs that already carry a manual
/// edge are left alone. Images that fail to decode or extract are logged and
/// skipped, so the batch always runs to the end. The returned edges are not
/// persisted; the caller stores them, replacing older edges of the same pair.
pub fn auto_match<M, S>(
    matcher: &M,
    storage: &S,
    source: &ImageId,
    others: &[ImageId],
    params: &MatchParams,
    mut progress: impl FnMut(BatchProgress),
) -> Result<Vec<OverlapEdge>, StorageError>
where
    M: FeatureMatcher,
    S: Storage + ?Sized,
{
    let Some(source_image) = decode_image(storage, source)? else {
        warn!("auto_match: source image {source} unavailable");
        return Ok(Vec::new());
    };
    let source_features = match extract_features(matcher, &source_image, params) {
        Ok(f) => f,
        Err(e) => {
            warn!("auto_match: feature extraction failed for {source}: {e}");
            return Ok(Vec::new());
        }
    };

    let existing = storage.overlap_edges()?;
    let targets: Vec<&ImageId> = others.iter().filter(|id| *id != source).collect();
    let total = targets.len();
    let mut edges = Vec::new();

    for (i, target) in targets.into_iter().enumerate() {
        progress(BatchProgress {
            index: i + 1,
            total,
            image_id: target.clone(),
        });

        if existing
            .iter()
            .any(|e| e.is_manual() && e.connects(source, target))
        {
            debug!("auto_match: {source}/{target} has a manual edge, skipping");
            continue;
        }
        let Some(target_image) = decode_image(storage, target)? else {
            continue;
        };
        let target_features = match extract_features(matcher, &target_image, params) {
            Ok(f) => f,
            Err(e) => {
                warn!("auto_match: feature extraction failed for {target}: {e}");
                continue;
            }
        };

        match find_homography(matcher, &source_features, &target_features, params) {
            Some(registration) => {
                debug!(
                    "auto_match: {source} -> {target} registered on {} matches",
                    registration.match_count
                );
                edges.push(OverlapEdge::automatic(
                    source.clone(),
                    target.clone(),
                    &registration,
                ));
            }
            None => debug!("auto_match: {source} -> {target} no registration"),
        }
    }
    Ok(edges)
}
