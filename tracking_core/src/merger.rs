//! Track list merger with duplicate removal.
//!
//! Inputs are ordered track lists, each restricted to the tracks that passed
//! its selected tier. Merge sets name lists in priority order; they are
//! applied one after the other to the same merged collection, so the result
//! never holds two duplicates.
//!
//! Two tracks are duplicates when the fraction of shared hits, counted on
//! primary clusters as shared / min(hit counts), exceeds
//! `shared_hit_fraction`. A newcomer with duplicates is dropped, unless its
//! set has `priority_quality` and its quality is strictly higher than every
//! duplicate's: then it takes the place of the first one and the others go.

use crate::{
    error::ConfigError,
    fitter::FittedTrack,
    quality::{TierGraph, TierResults},
    types::{ClusterId, TrackId, TrackQuality},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrackListSpec {
    /// Tier a track must pass to enter; `None` admits every track that passed any tier
    pub selected_tier: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeSet {
    /// List indices, highest priority first
    pub lists: Vec<usize>,
    pub priority_quality: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MergerConfig {
    pub lists: Vec<TrackListSpec>,
    pub sets_to_merge: Vec<MergeSet>,
    pub shared_hit_fraction: f64,
}

impl Default for MergerConfig {
    fn default() -> Self {
        Self {
            lists: vec![
                TrackListSpec {
                    selected_tier: Some("secStepVtx".to_string()),
                },
                TrackListSpec {
                    selected_tier: Some("secStepTrk".to_string()),
                },
            ],
            sets_to_merge: vec![MergeSet {
                lists: vec![0, 1],
                priority_quality: true,
            }],
            shared_hit_fraction: 0.19,
        }
    }
}

// ---------------------------------------------------------------------------
// Lists and output
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TrackListEntry<'a> {
    pub track: &'a FittedTrack,
    /// Index of the highest tier the track passed
    pub tier: usize,
    pub quality: TrackQuality,
}

/// One merger input.
#[derive(Clone, Debug, Default)]
pub struct TrackList<'a> {
    pub entries: Vec<TrackListEntry<'a>>,
}

impl<'a> TrackList<'a> {
    /// Tracks that passed `selected` (any tier if `None`), tagged with their
    /// highest passed tier. `results` is aligned with `tracks`.
    pub fn from_classified(
        tracks: &'a [FittedTrack],
        results: &[TierResults],
        graph: &TierGraph,
        selected: Option<usize>,
    ) -> Self {
        let entries = tracks
            .iter()
            .zip(results)
            .filter(|(_, r)| selected.map_or(true, |s| r.passed(s)))
            .filter_map(|(track, r)| {
                let tier = r.highest_passed(graph)?;
                Some(TrackListEntry {
                    track,
                    tier,
                    quality: graph.tiers()[tier].quality,
                })
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct MergedTrack {
    pub track: FittedTrack,
    /// Public name of the highest tier passed
    pub tier: String,
    pub quality: TrackQuality,
    /// Input list the track was admitted from
    pub source_list: usize,
}

#[derive(Clone, Debug, Default)]
pub struct MergedTrackCollection {
    pub tracks: Vec<MergedTrack>,
    /// Candidates discarded or replaced as duplicates
    pub n_duplicates: usize,
}

impl MergedTrackCollection {
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn ids(&self) -> Vec<TrackId> {
        self.tracks.iter().map(|m| m.track.id).collect()
    }

    /// Tracks of at least `min` quality.
    pub fn with_quality(&self, min: TrackQuality) -> Vec<&FittedTrack> {
        self.tracks
            .iter()
            .filter(|m| m.quality >= min)
            .map(|m| &m.track)
            .collect()
    }
}

/// Shared / min(hit counts) on primary clusters.
pub fn shared_hit_fraction(a: &FittedTrack, b: &FittedTrack) -> f64 {
    let sa: BTreeSet<ClusterId> = a.primary_clusters.iter().copied().collect();
    let shared = b.primary_clusters.iter().filter(|c| sa.contains(c)).count();
    let denom = a.primary_clusters.len().min(b.primary_clusters.len());
    if denom == 0 {
        0.0
    } else {
        shared as f64 / denom as f64
    }
}

// ---------------------------------------------------------------------------
// Merger
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct TrackListMerger {
    pub config: MergerConfig,
    /// Resolved selected tier of each list
    selected: Vec<Option<usize>>,
}

impl TrackListMerger {
    pub fn new(config: MergerConfig, graph: &TierGraph) -> Result<Self, ConfigError> {
        let f = config.shared_hit_fraction;
        if !(0.0..=1.0).contains(&f) {
            return Err(ConfigError::invalid(
                "merger.shared_hit_fraction",
                format!("{f} is outside [0, 1]"),
            ));
        }
        let selected = config
            .lists
            .iter()
            .enumerate()
            .map(|(i, spec)| match &spec.selected_tier {
                None => Ok(None),
                Some(name) => graph.index_of(name).map(Some).ok_or_else(|| {
                    ConfigError::UnknownSelectedTier {
                        list: i,
                        tier: name.clone(),
                    }
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (s, set) in config.sets_to_merge.iter().enumerate() {
            if let Some(&bad) = set.lists.iter().find(|&&l| l >= config.lists.len()) {
                return Err(ConfigError::UnknownTrackList {
                    set: s,
                    list: bad,
                    available: config.lists.len(),
                });
            }
        }
        Ok(Self { config, selected })
    }

    /// Inputs for one classified track collection, one list per configured spec.
    pub fn lists<'a>(
        &self,
        tracks: &'a [FittedTrack],
        results: &[TierResults],
        graph: &TierGraph,
    ) -> Vec<TrackList<'a>> {
        self.selected
            .iter()
            .map(|sel| TrackList::from_classified(tracks, results, graph, *sel))
            .collect()
    }

    pub fn merge(&self, lists: &[TrackList<'_>], graph: &TierGraph) -> MergedTrackCollection {
        let mut merged = MergedTrackCollection::default();
        for set in &self.config.sets_to_merge {
            for &l in &set.lists {
                let Some(list) = lists.get(l) else {
                    continue;
                };
                for entry in &list.entries {
                    self.admit(&mut merged, entry, l, set.priority_quality, graph);
                }
            }
        }
        tracing::debug!(
            merged = merged.len(),
            duplicates = merged.n_duplicates,
            "track lists merged"
        );
        merged
    }

    fn admit(
        &self,
        merged: &mut MergedTrackCollection,
        entry: &TrackListEntry<'_>,
        source_list: usize,
        priority_quality: bool,
        graph: &TierGraph,
    ) {
        let dups: Vec<usize> = merged
            .tracks
            .iter()
            .enumerate()
            .filter(|(_, m)| {
                m.track.id == entry.track.id
                    || shared_hit_fraction(&m.track, entry.track) > self.config.shared_hit_fraction
            })
            .map(|(i, _)| i)
            .collect();

        let newcomer = || MergedTrack {
            track: entry.track.clone(),
            tier: graph.tiers()[entry.tier].name.clone(),
            quality: entry.quality,
            source_list,
        };

        let Some(&first) = dups.first() else {
            merged.tracks.push(newcomer());
            return;
        };
        let outranks = priority_quality && dups.iter().all(|&d| entry.quality > merged.tracks[d].quality);
        if !outranks {
            merged.n_duplicates += 1;
            return;
        }
        merged.tracks[first] = newcomer();
        for &d in dups[1..].iter().rev() {
            merged.tracks.remove(d);
        }
        merged.n_duplicates += dups.len();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
