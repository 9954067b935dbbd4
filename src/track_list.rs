use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use crate::error::Error;
use crate::feature::{Feature, Kind, Record};

/// Largest squared center distance, in pixels, between two sightings of
/// the same feature.
pub const MAX_CENTER_SSQ: i32 = 100;

/// Largest hue difference, in `[0, 1)` hue units, between two sightings of
/// the same feature.
pub const MAX_HUE_DIFF: f32 = 0.1;

/// Produces this cycle's candidate features from a source.
pub trait Detect<K: Kind, S: ?Sized> {
    fn detect(&self, source: &S) -> Result<Vec<Feature<K>>, Error>;
}

/// Decides whether a candidate re-confirms an existing feature.
pub trait Similarity<K: Kind> {
    fn same_as(&self, existing: &Feature<K>, candidate: &Feature<K>) -> bool;
}

/// Same kind, centers within 10 px and hues within 0.1.
#[derive(Debug, Clone, Copy)]
pub struct CenterHue {
    pub max_center_ssq: i32,
    pub max_hue_diff: f32,
}

impl Default for CenterHue {
    fn default() -> Self {
        Self {
            max_center_ssq: MAX_CENTER_SSQ,
            max_hue_diff: MAX_HUE_DIFF,
        }
    }
}

impl<K: Kind> Similarity<K> for CenterHue {
    fn same_as(&self, existing: &Feature<K>, candidate: &Feature<K>) -> bool {
        let (a, b) = (existing.center(), candidate.center());
        let (dx, dy) = (i64::from(a.x) - i64::from(b.x), i64::from(a.y) - i64::from(b.y));
        let cen_ssq = dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy));
        let col_diff = existing.hue() - candidate.hue();

        debug!(
            "check same {:?}@{} {:?}@{}: cen_ssq {} col_diff {}",
            existing.color,
            existing.center(),
            candidate.color,
            candidate.center(),
            cen_ssq,
            col_diff
        );

        existing.kind == candidate.kind
            && cen_ssq <= i64::from(self.max_center_ssq)
            && col_diff.abs() <= self.max_hue_diff
    }
}

/// Ordered list of tracked features of one kind family.
#[derive(Debug, Clone)]
pub struct TrackList<K: Kind, S = CenterHue> {
    features: Vec<Feature<K>>,
    similarity: S,
    elevation_limit: Option<i32>,
}

impl<K: Kind> TrackList<K, CenterHue> {
    pub fn new() -> Self {
        Self::with_similarity(CenterHue::default())
    }
}

impl<K: Kind> Default for TrackList<K, CenterHue> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Kind> FromIterator<Feature<K>> for TrackList<K, CenterHue> {
    fn from_iter<I: IntoIterator<Item = Feature<K>>>(iter: I) -> Self {
        let mut list = Self::new();
        list.features.extend(iter);
        list
    }
}

impl<K: Kind, S: Similarity<K>> TrackList<K, S> {
    pub fn with_similarity(similarity: S) -> Self {
        Self {
            features: Vec::with_capacity(16),
            similarity,
            elevation_limit: None,
        }
    }

    /// Only features below `limit` elevation may be chosen as new targets.
    pub fn with_target_elevation_limit(mut self, limit: i32) -> Self {
        self.elevation_limit = Some(limit);
        self
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.features.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Feature<K>> {
        self.features.iter()
    }

    #[inline]
    pub fn features(&self) -> &[Feature<K>] {
        &self.features
    }

    #[inline]
    pub fn targets(&self) -> impl Iterator<Item = &Feature<K>> {
        self.features.iter().filter(|f| f.target)
    }

    #[inline]
    pub fn target(&self, kind: K) -> Option<&Feature<K>> {
        self.features.iter().find(|f| f.kind == kind && f.target)
    }

    /// Detect new features and merge them in. A failing detector counts as
    /// an empty detection.
    pub fn refresh<D, Src>(&mut self, detector: &D, source: &Src)
    where
        D: Detect<K, Src> + ?Sized,
        Src: ?Sized,
    {
        let update = match detector.detect(source) {
            Ok(update) => update,
            Err(err) => {
                warn!("detection failed, merging empty batch: {}", err);
                Vec::new()
            }
        };

        self.merge(update);
    }

    /// Age every feature by one cycle, replace the ones re-confirmed by a
    /// candidate and append the candidates nobody claimed.
    ///
    /// Matching is greedy: each existing feature, in list order, takes the
    /// first unclaimed candidate it is the same as.
    pub fn merge(&mut self, mut update: Vec<Feature<K>>) {
        debug!("merge into [{}]", self);

        update.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));

        let mut pool: BTreeMap<K, Vec<Feature<K>>> = BTreeMap::new();
        for candidate in update {
            pool.entry(candidate.kind).or_default().push(candidate);
        }

        let existing = std::mem::take(&mut self.features);
        self.features.reserve(existing.len());

        for mut feature in existing {
            if feature.ttl < 1 {
                debug!("dropping {} ttl < 1", feature);
                continue;
            }

            feature.ttl -= 1;

            let candidates = pool.get_mut(&feature.kind);
            let matched = candidates.and_then(|candidates| {
                let pos = candidates
                    .iter()
                    .position(|c| self.similarity.same_as(&feature, c))?;

                Some(candidates.remove(pos))
            });

            match matched {
                Some(candidate) => {
                    debug!("{} same feature {}", feature, candidate);
                    self.features.push(candidate);
                }
                None => self.features.push(feature),
            }
        }

        for candidate in pool.into_values().flatten() {
            debug!("appending {}", candidate);
            self.features.push(candidate);
        }
    }

    /// For each kind without a target, make its most confident feature the
    /// target. Existing targets are never moved.
    pub fn update_targets(&mut self) {
        for &kind in K::TRACKED {
            if self.target(kind).is_some() {
                continue;
            }

            let limit = self.elevation_limit;
            let mut best: Option<&mut Feature<K>> = None;

            for feature in self.features.iter_mut() {
                if feature.kind != kind {
                    continue;
                }

                if let Some(limit) = limit {
                    if feature.azel().1 >= limit {
                        continue;
                    }
                }

                let better = match &best {
                    Some(b) => feature.confidence > b.confidence,
                    None => true,
                };

                if better {
                    best = Some(feature);
                }
            }

            if let Some(best) = best {
                best.target = true;
                debug!("{} is target", best);
            }
        }
    }

    /// Records sorted by kind, then by decreasing confidence.
    pub fn format(&self) -> Vec<Record> {
        let mut features: Vec<&Feature<K>> = self.features.iter().collect();
        features.sort_by(|a, b| a.sort_key().total_cmp(&b.sort_key()));
        features.into_iter().map(Feature::record).collect()
    }

    /// Fixed-length target vector: `EVENT_WIDTH` values per tracked kind,
    /// zeros for kinds without a target.
    pub fn event(&self) -> Vec<i32> {
        let mut event = Vec::with_capacity(K::EVENT_WIDTH * K::TRACKED.len());

        for &kind in K::TRACKED {
            let start = event.len();

            if let Some(target) = self.target(kind) {
                event.extend(K::event_values(target).into_iter().take(K::EVENT_WIDTH));
            }

            event.resize(start + K::EVENT_WIDTH, 0);
        }

        event
    }
}

impl<K: Kind, S> fmt::Display for TrackList<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, feature) in self.features.iter().enumerate() {
            if idx > 0 {
                write!(f, ",")?;
            }

            write!(f, "{}", feature)?;
        }

        Ok(())
    }
}
