//! Tracklets: short chains of points, one per frame, that are believed to
//! be the same neuron.

pub mod stitch;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::TrackletError;
use crate::frame::Zxy;

pub use stitch::{stitch_tracklets, TrackletGraph};

/*-----------------------------------------------------------------------------
Tracklet
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackletPoint {
    pub point_index: usize,
    #[serde(with = "nullable_zxy")]
    pub zxy: Option<Zxy>,
}

/// JSON has no NaN: non-finite components are written as `null` and read
/// back as NaN.
mod nullable_zxy {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use crate::frame::Zxy;

    pub fn serialize<S: Serializer>(zxy: &Option<Zxy>, serializer: S) -> Result<S::Ok, S::Error> {
        zxy.map(|p| p.map(|v| v.is_finite().then_some(v)))
            .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Zxy>, D::Error> {
        let raw = Option::<[Option<f64>; 3]>::deserialize(deserializer)?;
        Ok(raw.map(|p| p.map(|v| v.unwrap_or(f64::NAN))))
    }
}

impl TrackletPoint {
    pub fn new(point_index: usize, zxy: Option<Zxy>) -> Self {
        Self { point_index, zxy }
    }
}

/// A named, time-ordered series keyed by frame index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracklet {
    name: String,
    points: BTreeMap<usize, TrackletPoint>,
}

impl Tracklet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            points: BTreeMap::new(),
        }
    }

    pub fn with_points<I>(name: impl Into<String>, points: I) -> Self
    where
        I: IntoIterator<Item = (usize, TrackletPoint)>,
    {
        Self {
            name: name.into(),
            points: points.into_iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replaces the point at `frame`, returning the previous one.
    pub fn insert(&mut self, frame: usize, point: TrackletPoint) -> Option<TrackletPoint> {
        self.points.insert(frame, point)
    }

    pub fn get(&self, frame: usize) -> Option<&TrackletPoint> {
        self.points.get(&frame)
    }

    pub fn points(&self) -> impl Iterator<Item = (usize, &TrackletPoint)> + '_ {
        self.points.iter().map(|(&t, p)| (t, p))
    }

    pub fn frames(&self) -> impl Iterator<Item = usize> + '_ {
        self.points.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn start_time(&self) -> Option<usize> {
        self.points.keys().next().copied()
    }

    pub fn end_time(&self) -> Option<usize> {
        self.points.keys().next_back().copied()
    }

    pub fn contains_frame(&self, frame: usize) -> bool {
        self.points.contains_key(&frame)
    }

    /// Frames where both tracklets have a point, ascending.
    pub fn time_overlap(&self, other: &Tracklet) -> Vec<usize> {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        small.frames().filter(|&t| large.contains_frame(t)).collect()
    }

    /// Moves the points at `t` and later into a new tracklet.
    fn split_off(&mut self, t: usize, name: String) -> Tracklet {
        Tracklet {
            name,
            points: self.points.split_off(&t),
        }
    }
}

/*-----------------------------------------------------------------------------
TrackletSet
-----------------------------------------------------------------------------*/

/// All tracklets of a recording, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackletSet {
    tracklets: BTreeMap<String, Tracklet>,
    next_id: usize,
}

impl TrackletSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name_for(id: usize) -> String {
        format!("tracklet_{:07}", id)
    }

    /// A name not used by any tracklet in the set.
    pub fn next_name(&mut self) -> String {
        loop {
            let name = Self::name_for(self.next_id);
            self.next_id += 1;
            if !self.tracklets.contains_key(&name) {
                return name;
            }
        }
    }

    pub fn insert(&mut self, tracklet: Tracklet) -> Result<(), TrackletError> {
        if self.tracklets.contains_key(tracklet.name()) {
            return Err(TrackletError::DuplicateName(tracklet.name().to_string()));
        }
        self.tracklets.insert(tracklet.name().to_string(), tracklet);
        Ok(())
    }

    /// Adds a tracklet under a fresh name and returns the name.
    pub fn push<I>(&mut self, points: I) -> String
    where
        I: IntoIterator<Item = (usize, TrackletPoint)>,
    {
        let name = self.next_name();
        self.tracklets
            .insert(name.clone(), Tracklet::with_points(name.clone(), points));
        name
    }

    pub fn get(&self, name: &str) -> Option<&Tracklet> {
        self.tracklets.get(name)
    }

    pub fn try_get(&self, name: &str) -> Result<&Tracklet, TrackletError> {
        self.get(name)
            .ok_or_else(|| TrackletError::UnknownTracklet(name.to_string()))
    }

    pub fn remove(&mut self, name: &str) -> Option<Tracklet> {
        self.tracklets.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tracklets.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.tracklets.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tracklet> + '_ {
        self.tracklets.values()
    }

    pub fn len(&self) -> usize {
        self.tracklets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracklets.is_empty()
    }

    /// Splits `name` so that it keeps the frames before `t`; the frames from
    /// `t` on go to a new tracklet whose name is returned.
    ///
    /// Both halves must be non-empty.
    pub fn split(&mut self, name: &str, t: usize) -> Result<String, TrackletError> {
        let tracklet = self.try_get(name)?;
        match (tracklet.start_time(), tracklet.end_time()) {
            (Some(start), Some(end)) if start < t && t <= end => {}
            (start, end) => {
                return Err(TrackletError::InvalidSplit {
                    name: name.to_string(),
                    split_time: t,
                    start: start.unwrap_or(0),
                    end: end.unwrap_or(0),
                })
            }
        }
        let right_name = self.next_name();
        let right = self
            .tracklets
            .get_mut(name)
            .map(|left| left.split_off(t, right_name.clone()))
            .ok_or_else(|| TrackletError::UnknownTracklet(name.to_string()))?;
        self.tracklets.insert(right_name.clone(), right);
        Ok(right_name)
    }

    /// Moves every point of `absorb` into `keep` and drops `absorb`.
    ///
    /// Refused if the two share a frame.
    pub fn merge(&mut self, keep: &str, absorb: &str) -> Result<(), TrackletError> {
        let overlap = self.try_get(keep)?.time_overlap(self.try_get(absorb)?);
        if !overlap.is_empty() {
            return Err(TrackletError::TimeOverlap {
                keep: keep.to_string(),
                absorb: absorb.to_string(),
                frames: overlap,
            });
        }
        if keep == absorb {
            return Ok(());
        }
        let absorbed = self
            .tracklets
            .remove(absorb)
            .ok_or_else(|| TrackletError::UnknownTracklet(absorb.to_string()))?;
        let kept = self
            .tracklets
            .get_mut(keep)
            .ok_or_else(|| TrackletError::UnknownTracklet(keep.to_string()))?;
        kept.points.extend(absorbed.points);
        Ok(())
    }
}

/// Frames that `candidate` shares with each of `others`.
///
/// Only tracklets with at least one shared frame are listed; `candidate`
/// itself is skipped if it appears in `others`. An empty map means no
/// conflict.
pub fn time_overlap_of_candidate_tracklet<'a, I>(
    candidate: &str,
    others: I,
    tracklets: &TrackletSet,
) -> Result<BTreeMap<String, Vec<usize>>, TrackletError>
where
    I: IntoIterator<Item = &'a str>,
{
    let candidate_tracklet = tracklets.try_get(candidate)?;
    let mut overlaps = BTreeMap::new();
    for name in others {
        if name == candidate {
            continue;
        }
        let overlap = candidate_tracklet.time_overlap(tracklets.try_get(name)?);
        if !overlap.is_empty() {
            overlaps.insert(name.to_string(), overlap);
        }
    }
    Ok(overlaps)
}
