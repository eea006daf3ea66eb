//! Exploration memory and perceptual view novelty.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::snapshot::WorkerSnapshot;
use super::types::{Frame, MapId, Position};

/// Downsample grid for the perceptual hash.
const NOVELTY_GRID_DIM: u32 = 32;
/// Hex chars kept from the digest; collisions at this length are harmless
/// (a missed novelty bonus, nothing else).
const VIEW_HASH_LEN: usize = 16;

// ============================================================================
// Novelty Report
// ============================================================================

/// What one observation contributed to exploration memory.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoveltyReport {
    pub new_map: bool,
    pub new_position: bool,
    /// A never-before-seen screen view, per the perceptual hash.
    pub novel_view: bool,
    pub view_hash: Option<String>,
}

// ============================================================================
// Exploration Record
// ============================================================================

/// Per-worker exploration memory: visited maps, visited tiles, seen views.
///
/// Grows monotonically for the lifetime of the worker process and is
/// intentionally never cleared, including across episode resets - only
/// objective timers reset, the agent keeps what it has seen.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExplorationRecord {
    visited_maps: BTreeSet<MapId>,
    visited_positions: BTreeMap<MapId, BTreeSet<Position>>,
    seen_view_hashes: BTreeSet<String>,
}

impl ExplorationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one snapshot into the record and report what was new.
    pub fn observe(&mut self, snapshot: &WorkerSnapshot) -> NoveltyReport {
        let mut report = NoveltyReport::default();

        report.new_map = self.visited_maps.insert(snapshot.map_id.clone());
        report.new_position = self
            .visited_positions
            .entry(snapshot.map_id.clone())
            .or_default()
            .insert(snapshot.position);

        if let Some(frame) = &snapshot.frame {
            if let Some(hash) = view_hash(frame) {
                report.novel_view = self.seen_view_hashes.insert(hash.clone());
                report.view_hash = Some(hash);
            }
        }

        report
    }

    pub fn has_visited_map(&self, map_id: &str) -> bool {
        self.visited_maps.contains(map_id)
    }

    pub fn maps_visited(&self) -> usize {
        self.visited_maps.len()
    }

    pub fn positions_visited(&self) -> usize {
        self.visited_positions.values().map(BTreeSet::len).sum()
    }

    pub fn unique_views(&self) -> usize {
        self.seen_view_hashes.len()
    }

    /// Short prose summary for prompt context.
    pub fn summarize(&self) -> String {
        if self.visited_maps.is_empty() {
            return "No exploration data yet.".to_string();
        }
        let recent: Vec<&str> = self
            .visited_maps
            .iter()
            .rev()
            .take(3)
            .map(String::as_str)
            .collect();
        format!(
            "Maps explored: {} | Positions visited: {} | Recent areas: {}",
            self.maps_visited(),
            self.positions_visited(),
            recent.join(", ")
        )
    }
}

// ============================================================================
// Perceptual Hash
// ============================================================================

/// Perceptual fingerprint of the central region of a frame.
///
/// The outer quarter border carries HUD chrome and window borders, so only
/// the center half of the frame participates. The crop is block-averaged
/// down to a 32x32 grid before hashing so single-pixel noise (sprite
/// animation frames, palette dither) does not defeat deduplication.
pub fn view_hash(frame: &Frame) -> Option<String> {
    if !frame.is_well_formed() {
        return None;
    }

    let crop_x = frame.width / 4;
    let crop_y = frame.height / 4;
    let crop_w = frame.width - 2 * crop_x;
    let crop_h = frame.height - 2 * crop_y;
    if crop_w == 0 || crop_h == 0 {
        return None;
    }

    let grid_w = NOVELTY_GRID_DIM.min(crop_w);
    let grid_h = NOVELTY_GRID_DIM.min(crop_h);

    let mut cells = Vec::with_capacity((grid_w * grid_h) as usize);
    for gy in 0..grid_h {
        let y0 = crop_y + gy * crop_h / grid_h;
        let y1 = crop_y + (gy + 1) * crop_h / grid_h;
        for gx in 0..grid_w {
            let x0 = crop_x + gx * crop_w / grid_w;
            let x1 = crop_x + (gx + 1) * crop_w / grid_w;

            let mut sum: u64 = 0;
            let mut count: u64 = 0;
            for y in y0..y1.max(y0 + 1) {
                for x in x0..x1.max(x0 + 1) {
                    sum += frame.pixel(x, y) as u64;
                    count += 1;
                }
            }
            cells.push((sum / count.max(1)) as u8);
        }
    }

    let digest = Sha256::digest(&cells);
    let mut encoded = hex::encode(digest);
    encoded.truncate(VIEW_HASH_LEN);
    Some(encoded)
}
