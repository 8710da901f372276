//! Identity assignment on top of a [`TrackletSet`], with the manual edits
//! used to correct it.
//!
//! An identity (a named neuron) owns a list of tracklets. A tracklet belongs
//! to at most one identity, and the tracklets of one identity never share a
//! frame. Every edit either keeps both rules or is refused.

pub mod persist;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::TrackletError;
use crate::tracklet::{time_overlap_of_candidate_tracklet, TrackletSet};

pub use persist::TrackletAnnotator;

/*-----------------------------------------------------------------------------
Conflicts
-----------------------------------------------------------------------------*/

/// Why a tracklet could not be given to an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentConflict {
    pub tracklet: String,
    pub identity: String,
    /// The identity already holding the tracklet.
    pub conflicting_identity: Option<String>,
    /// Frames shared with each of `identity`'s tracklets.
    pub time_conflicts: BTreeMap<String, Vec<usize>>,
}

impl AssignmentConflict {
    pub fn is_empty(&self) -> bool {
        self.conflicting_identity.is_none() && self.time_conflicts.is_empty()
    }
}

impl fmt::Display for AssignmentConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tracklet {} cannot be assigned to {}", self.tracklet, self.identity)?;
        if let Some(other) = &self.conflicting_identity {
            write!(f, "; already assigned to {}", other)?;
        }
        for (name, frames) in &self.time_conflicts {
            match (frames.first(), frames.last()) {
                (Some(first), Some(last)) => write!(
                    f,
                    "; overlaps {} at {} frame(s) in {}..={}",
                    name,
                    frames.len(),
                    first,
                    last
                )?,
                _ => write!(f, "; overlaps {}", name)?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    /// The tracklet already belongs to this identity.
    AlreadyAdded,
    /// The tracklet belongs to a different identity.
    Identity,
    /// The tracklet shares frames with the identity's tracklets.
    Time,
}

/*-----------------------------------------------------------------------------
AnnotationState
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationState {
    tracklets: TrackletSet,
    global2tracklet: BTreeMap<String, Vec<String>>,
    /// left name -> names of the right halves split off it
    split_names: BTreeMap<String, Vec<String>>,
    /// left name -> `(t - 1, t)` of each split
    split_times: BTreeMap<String, Vec<(usize, usize)>>,
    manual_additions: BTreeMap<String, Vec<String>>,
    manual_removals: BTreeMap<String, Vec<String>>,
    current_neuron: Option<String>,
    current_tracklet: Option<String>,
    previous_tracklet: Option<String>,
}

fn remove_name(list: &mut Vec<String>, name: &str) -> bool {
    let before = list.len();
    list.retain(|n| n != name);
    list.len() != before
}

impl AnnotationState {
    pub fn new(tracklets: TrackletSet) -> Self {
        Self {
            tracklets,
            ..Default::default()
        }
    }

    /// Starts from an existing identity map, e.g. an automatic one.
    ///
    /// # Errors
    /// Unknown tracklet names, tracklets listed under two identities, and
    /// time overlaps within one identity are all rejected.
    pub fn with_identities(
        tracklets: TrackletSet,
        global2tracklet: BTreeMap<String, Vec<String>>,
    ) -> Result<Self, TrackletError> {
        let mut state = Self::new(tracklets);
        for (identity, names) in global2tracklet {
            state.global2tracklet.entry(identity.clone()).or_default();
            for name in names {
                state.check_assignment(&name, &identity, false)?;
                state.push_assignment(&name, &identity);
            }
        }
        Ok(state)
    }

    pub fn tracklets(&self) -> &TrackletSet {
        &self.tracklets
    }

    pub fn global2tracklet(&self) -> &BTreeMap<String, Vec<String>> {
        &self.global2tracklet
    }

    pub fn split_names(&self) -> &BTreeMap<String, Vec<String>> {
        &self.split_names
    }

    pub fn split_times(&self) -> &BTreeMap<String, Vec<(usize, usize)>> {
        &self.split_times
    }

    pub fn manual_additions(&self, identity: &str) -> &[String] {
        self.manual_additions.get(identity).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn manual_removals(&self, identity: &str) -> &[String] {
        self.manual_removals.get(identity).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn tracklets_for_neuron(&self, identity: &str) -> &[String] {
        self.global2tracklet.get(identity).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn identity_of(&self, tracklet: &str) -> Option<&str> {
        self.global2tracklet
            .iter()
            .find(|(_, names)| names.iter().any(|n| n == tracklet))
            .map(|(identity, _)| identity.as_str())
    }

    /*---- conflicts ----*/

    /// Frames `tracklet` shares with each tracklet of `identity`.
    pub fn time_conflicts(
        &self,
        tracklet: &str,
        identity: &str,
    ) -> Result<BTreeMap<String, Vec<usize>>, TrackletError> {
        time_overlap_of_candidate_tracklet(
            tracklet,
            self.tracklets_for_neuron(identity).iter().map(String::as_str),
            &self.tracklets,
        )
    }

    fn conflict(&self, tracklet: &str, identity: &str) -> Result<AssignmentConflict, TrackletError> {
        Ok(AssignmentConflict {
            tracklet: tracklet.to_string(),
            identity: identity.to_string(),
            conflicting_identity: self
                .identity_of(tracklet)
                .filter(|&other| other != identity)
                .map(str::to_string),
            time_conflicts: self.time_conflicts(tracklet, identity)?,
        })
    }

    fn check_assignment(
        &self,
        tracklet: &str,
        identity: &str,
        reassign: bool,
    ) -> Result<AssignmentConflict, TrackletError> {
        let conflict = self.conflict(tracklet, identity)?;
        let blocked = !conflict.time_conflicts.is_empty()
            || (conflict.conflicting_identity.is_some() && !reassign);
        if blocked {
            warn!(%conflict, "assignment refused");
            return Err(TrackletError::Conflict(conflict));
        }
        Ok(conflict)
    }

    /// Every kind of conflict `tracklet` would have with `identity`; empty
    /// if it can be assigned as is.
    pub fn types_of_conflicts(
        &self,
        tracklet: &str,
        identity: &str,
    ) -> Result<Vec<ConflictKind>, TrackletError> {
        if self.tracklets_for_neuron(identity).iter().any(|n| n == tracklet) {
            return Ok(vec![ConflictKind::AlreadyAdded]);
        }
        let conflict = self.conflict(tracklet, identity)?;
        let mut kinds = Vec::new();
        if conflict.conflicting_identity.is_some() {
            kinds.push(ConflictKind::Identity);
        }
        if !conflict.time_conflicts.is_empty() {
            kinds.push(ConflictKind::Time);
        }
        Ok(kinds)
    }

    /*---- assignment ----*/

    fn push_assignment(&mut self, tracklet: &str, identity: &str) {
        let names = self.global2tracklet.entry(identity.to_string()).or_default();
        if !names.iter().any(|n| n == tracklet) {
            names.push(tracklet.to_string());
        }
    }

    /// Gives `tracklet` to `identity`.
    ///
    /// Refused with [`TrackletError::Conflict`] if it overlaps in time with
    /// the identity's tracklets, or if it belongs to another identity and
    /// `reassign` is false. With `reassign` it is taken away from the other
    /// identity. Assigning a tracklet to its own identity does nothing.
    pub fn assign(
        &mut self,
        tracklet: &str,
        identity: &str,
        reassign: bool,
    ) -> Result<(), TrackletError> {
        if self.tracklets_for_neuron(identity).iter().any(|n| n == tracklet) {
            debug!(tracklet, identity, "tracklet already assigned");
            return Ok(());
        }
        let conflict = self.check_assignment(tracklet, identity, reassign)?;
        if let Some(other) = conflict.conflicting_identity {
            self.unassign(tracklet, &other);
        }

        self.push_assignment(tracklet, identity);
        let additions = self.manual_additions.entry(identity.to_string()).or_default();
        if !additions.iter().any(|n| n == tracklet) {
            additions.push(tracklet.to_string());
        }
        if let Some(removals) = self.manual_removals.get_mut(identity) {
            remove_name(removals, tracklet);
        }
        info!(tracklet, identity, "assigned tracklet");
        Ok(())
    }

    /// Takes `tracklet` away from `identity`. Always allowed; returns whether
    /// anything changed.
    pub fn unassign(&mut self, tracklet: &str, identity: &str) -> bool {
        let removed = self
            .global2tracklet
            .get_mut(identity)
            .is_some_and(|names| remove_name(names, tracklet));
        if let Some(additions) = self.manual_additions.get_mut(identity) {
            remove_name(additions, tracklet);
        }
        if removed {
            let removals = self.manual_removals.entry(identity.to_string()).or_default();
            if !removals.iter().any(|n| n == tracklet) {
                removals.push(tracklet.to_string());
            }
            info!(tracklet, identity, "unassigned tracklet");
        }
        removed
    }

    /// Unassigns `tracklet` from whichever identity holds it.
    pub fn remove_tracklet_from_all_matches(&mut self, tracklet: &str) -> Option<String> {
        let identity = self.identity_of(tracklet)?.to_string();
        self.unassign(tracklet, &identity);
        Some(identity)
    }

    /// Unassigns every tracklet of `identity` that shares a frame with
    /// `tracklet`, returning their names.
    pub fn remove_tracklets_with_time_conflicts(
        &mut self,
        tracklet: &str,
        identity: &str,
    ) -> Result<Vec<String>, TrackletError> {
        if !self.global2tracklet.contains_key(identity) {
            return Err(TrackletError::UnknownIdentity(identity.to_string()));
        }
        let conflicting: Vec<String> = self
            .time_conflicts(tracklet, identity)?
            .into_keys()
            .collect();
        for name in &conflicting {
            self.unassign(name, identity);
        }
        Ok(conflicting)
    }

    /// Unassigns every tracklet of `identity` starting after `t`.
    pub fn remove_all_tracklets_after_time(
        &mut self,
        identity: &str,
        t: usize,
    ) -> Result<Vec<String>, TrackletError> {
        let names = self
            .global2tracklet
            .get(identity)
            .ok_or_else(|| TrackletError::UnknownIdentity(identity.to_string()))?;
        let late: Vec<String> = names
            .iter()
            .filter(|name| {
                self.tracklets
                    .get(name)
                    .and_then(|tr| tr.start_time())
                    .is_some_and(|start| start > t)
            })
            .cloned()
            .collect();
        warn!(identity, t, n_removed = late.len(), "removing tracklets after time");
        for name in &late {
            self.unassign(name, identity);
        }
        Ok(late)
    }

    /*---- tracklet edits ----*/

    /// Splits `tracklet` at `t` and returns the name of the right half.
    ///
    /// The left half keeps the name and any identity; the right half starts
    /// unassigned.
    pub fn split(&mut self, tracklet: &str, t: usize) -> Result<String, TrackletError> {
        let right = self.tracklets.split(tracklet, t)?;
        self.split_names
            .entry(tracklet.to_string())
            .or_default()
            .push(right.clone());
        self.split_times
            .entry(tracklet.to_string())
            .or_default()
            .push((t - 1, t));
        info!(tracklet, t, right = %right, "split tracklet");
        Ok(right)
    }

    /// Moves `absorb` into `keep`; `absorb` disappears everywhere.
    ///
    /// Refused when the two share a frame, or when they belong to different
    /// identities.
    pub fn merge(&mut self, keep: &str, absorb: &str) -> Result<(), TrackletError> {
        let keep_identity = self.identity_of(keep).map(str::to_string);
        let absorb_identity = self.identity_of(absorb).map(str::to_string);
        if let (Some(k), Some(a)) = (&keep_identity, &absorb_identity) {
            if k != a {
                let conflict = AssignmentConflict {
                    tracklet: absorb.to_string(),
                    identity: k.clone(),
                    conflicting_identity: Some(a.clone()),
                    time_conflicts: BTreeMap::new(),
                };
                warn!(%conflict, "merge refused");
                return Err(TrackletError::Conflict(conflict));
            }
        }
        if let Some(k) = &keep_identity {
            // absorbed frames must not collide with the rest of keep's identity
            let time_conflicts = self.time_conflicts(absorb, k)?;
            if !time_conflicts.is_empty() {
                let conflict = AssignmentConflict {
                    tracklet: absorb.to_string(),
                    identity: k.clone(),
                    conflicting_identity: None,
                    time_conflicts,
                };
                warn!(%conflict, "merge refused");
                return Err(TrackletError::Conflict(conflict));
            }
        }
        self.tracklets.merge(keep, absorb)?;

        for names in self
            .global2tracklet
            .values_mut()
            .chain(self.manual_additions.values_mut())
            .chain(self.manual_removals.values_mut())
        {
            remove_name(names, absorb);
        }
        for current in [&mut self.current_tracklet, &mut self.previous_tracklet] {
            if current.as_deref() == Some(absorb) {
                *current = Some(keep.to_string());
            }
        }
        info!(keep, absorb, "merged tracklets");
        Ok(())
    }

    /*---- current selection ----*/

    pub fn current_neuron(&self) -> Option<&str> {
        self.current_neuron.as_deref()
    }

    pub fn current_tracklet(&self) -> Option<&str> {
        self.current_tracklet.as_deref()
    }

    pub fn previous_tracklet(&self) -> Option<&str> {
        self.previous_tracklet.as_deref()
    }

    pub fn set_current_neuron(&mut self, identity: Option<&str>) {
        self.current_neuron = identity.map(str::to_string);
    }

    /// Selects a tracklet; the old selection becomes the previous one.
    pub fn set_current_tracklet(&mut self, tracklet: Option<&str>) -> Result<(), TrackletError> {
        if let Some(name) = tracklet {
            self.tracklets.try_get(name)?;
        }
        let old = std::mem::replace(&mut self.current_tracklet, tracklet.map(str::to_string));
        if old.is_some() {
            self.previous_tracklet = old;
        }
        Ok(())
    }

    fn require_current_tracklet(&self) -> Result<&str, TrackletError> {
        self.current_tracklet
            .as_deref()
            .ok_or(TrackletError::NoCurrentTracklet)
    }

    fn require_current_neuron(&self) -> Result<&str, TrackletError> {
        self.current_neuron
            .as_deref()
            .ok_or(TrackletError::NoCurrentNeuron)
    }

    pub fn start_time_of_current_tracklet(&self) -> Result<Option<usize>, TrackletError> {
        let name = self.require_current_tracklet()?;
        Ok(self.tracklets.try_get(name)?.start_time())
    }

    pub fn end_time_of_current_tracklet(&self) -> Result<Option<usize>, TrackletError> {
        let name = self.require_current_tracklet()?;
        Ok(self.tracklets.try_get(name)?.end_time())
    }

    /// Conflicts between the current tracklet and the current neuron.
    pub fn current_conflicts(&self) -> Result<Vec<ConflictKind>, TrackletError> {
        self.types_of_conflicts(self.require_current_tracklet()?, self.require_current_neuron()?)
    }

    /// First time after `after` at which the current tracklet collides with
    /// one of the current neuron's tracklets, and that tracklet's name.
    pub fn time_of_next_conflict(
        &self,
        after: usize,
    ) -> Result<Option<(usize, String)>, TrackletError> {
        let conflicts = self.time_conflicts(
            self.require_current_tracklet()?,
            self.require_current_neuron()?,
        )?;
        Ok(conflicts
            .into_iter()
            .filter_map(|(name, frames)| {
                let first = frames.first().copied()?;
                (first > after).then_some((first, name))
            })
            .min())
    }

    /// Assigns the current tracklet to the current neuron and clears the
    /// tracklet selection. Returns the assigned name.
    pub fn save_current_tracklet_to_current_neuron(
        &mut self,
        reassign: bool,
    ) -> Result<String, TrackletError> {
        let tracklet = self.require_current_tracklet()?.to_string();
        let identity = self.require_current_neuron()?.to_string();
        self.assign(&tracklet, &identity, reassign)?;
        self.set_current_tracklet(None)?;
        Ok(tracklet)
    }

    /// Splits the current tracklet at `t`. The right half becomes current if
    /// `select_right_half`, otherwise the left half stays selected.
    pub fn split_current_tracklet(
        &mut self,
        t: usize,
        select_right_half: bool,
    ) -> Result<String, TrackletError> {
        let left = self.require_current_tracklet()?.to_string();
        let right = self.split(&left, t)?;
        let selected = if select_right_half { &right } else { &left };
        self.set_current_tracklet(Some(selected.as_str()))?;
        Ok(right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracklet::TrackletPoint;

    fn span(start: usize, end: usize) -> Vec<(usize, TrackletPoint)> {
        (start..=end).map(|t| (t, TrackletPoint::new(t % 3, None))).collect()
    }

    /// T1 covers 10..=20, T2 15..=25, T3 30..=40.
    fn state() -> (AnnotationState, String, String, String) {
        let mut set = TrackletSet::new();
        let t1 = set.push(span(10, 20));
        let t2 = set.push(span(15, 25));
        let t3 = set.push(span(30, 40));
        (AnnotationState::new(set), t1, t2, t3)
    }

    #[test]
    fn test_time_overlap_refused() {
        let (mut state, t1, t2, _) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        let conflict = match state.assign(&t2, "AVAL", false) {
            Err(TrackletError::Conflict(conflict)) => conflict,
            other => panic!("expected a conflict, got {:?}", other),
        };
        assert_eq!(conflict.conflicting_identity, None);
        assert_eq!(conflict.time_conflicts[&t1], (15..=20).collect::<Vec<_>>());
        assert_eq!(state.tracklets_for_neuron("AVAL"), &[t1]);
    }

    #[test]
    fn test_identity_conflict_and_reassign() {
        let (mut state, t1, _, _) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        let err = state.assign(&t1, "AVAR", false);
        assert!(matches!(err, Err(TrackletError::Conflict(c)) if c.conflicting_identity.as_deref() == Some("AVAL")));

        state.assign(&t1, "AVAR", true).unwrap();
        assert_eq!(state.identity_of(&t1), Some("AVAR"));
        assert!(state.tracklets_for_neuron("AVAL").is_empty());
        assert_eq!(state.manual_removals("AVAL"), &[t1.clone()]);
    }

    #[test]
    fn test_assign_is_idempotent() {
        let (mut state, t1, _, t3) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&t3, "AVAL", false).unwrap();
        assert_eq!(state.tracklets_for_neuron("AVAL"), &[t1, t3]);
    }

    #[test]
    fn test_unassign_always_allowed() {
        let (mut state, t1, _, _) = state();
        assert!(!state.unassign(&t1, "AVAL"));
        state.assign(&t1, "AVAL", false).unwrap();
        assert!(state.unassign(&t1, "AVAL"));
        assert!(!state.unassign(&t1, "AVAL"));
        assert!(state.manual_additions("AVAL").is_empty());
        assert_eq!(state.identity_of(&t1), None);
    }

    #[test]
    fn test_types_of_conflicts() {
        let (mut state, t1, t2, t3) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&t3, "AVAR", false).unwrap();
        assert_eq!(
            state.types_of_conflicts(&t1, "AVAL").unwrap(),
            vec![ConflictKind::AlreadyAdded]
        );
        assert_eq!(
            state.types_of_conflicts(&t2, "AVAL").unwrap(),
            vec![ConflictKind::Time]
        );
        assert_eq!(
            state.types_of_conflicts(&t3, "AVAL").unwrap(),
            vec![ConflictKind::Identity]
        );
        assert!(state.types_of_conflicts(&t2, "AVAR").unwrap().is_empty());
    }

    #[test]
    fn test_split_records_ledger() {
        let (mut state, t1, _, _) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        let right = state.split(&t1, 15).unwrap();

        assert_eq!(state.tracklets().get(&t1).unwrap().end_time(), Some(14));
        assert_eq!(state.tracklets().get(&right).unwrap().start_time(), Some(15));
        assert_eq!(state.split_names()[&t1], vec![right.clone()]);
        assert_eq!(state.split_times()[&t1], vec![(14, 15)]);
        assert_eq!(state.identity_of(&t1), Some("AVAL"));
        assert_eq!(state.identity_of(&right), None);
    }

    #[test]
    fn test_split_then_assign_resolves_overlap() {
        let (mut state, t1, t2, _) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        // cut T2 after T1 ends; its right half then fits
        let right = state.split(&t2, 21).unwrap();
        state.assign(&right, "AVAL", false).unwrap();
        assert_eq!(state.tracklets_for_neuron("AVAL").len(), 2);
    }

    #[test]
    fn test_merge() {
        let (mut state, t1, t2, t3) = state();
        assert!(matches!(
            state.merge(&t1, &t2),
            Err(TrackletError::TimeOverlap { .. })
        ));

        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&t3, "AVAR", false).unwrap();
        assert!(matches!(state.merge(&t1, &t3), Err(TrackletError::Conflict(_))));

        state.unassign(&t3, "AVAR");
        state.set_current_tracklet(Some(t3.as_str())).unwrap();
        state.merge(&t1, &t3).unwrap();
        assert!(!state.tracklets().contains(&t3));
        assert!(state.manual_removals("AVAR").is_empty());
        assert_eq!(state.current_tracklet(), Some(t1.as_str()));
        assert_eq!(state.tracklets().get(&t1).unwrap().end_time(), Some(40));
    }

    #[test]
    fn test_merge_keeps_identity_free_of_overlaps() {
        let (mut state, t1, _, t3) = state();
        let blocker = state
            .tracklets
            .push((32..=33).map(|t| (t, TrackletPoint::new(0, None))));
        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&blocker, "AVAL", false).unwrap();
        // T3 would bring frames 32 and 33 into AVAL a second time
        let err = state.merge(&t1, &t3);
        assert!(
            matches!(err, Err(TrackletError::Conflict(ref c)) if c.time_conflicts.contains_key(&blocker))
        );
        assert!(state.tracklets().contains(&t3));
    }

    #[test]
    fn test_current_selection_workflow() {
        let (mut state, t1, t2, _) = state();
        assert_eq!(
            state.save_current_tracklet_to_current_neuron(false),
            Err(TrackletError::NoCurrentTracklet)
        );
        state.set_current_tracklet(Some(t1.as_str())).unwrap();
        assert_eq!(
            state.save_current_tracklet_to_current_neuron(false),
            Err(TrackletError::NoCurrentNeuron)
        );
        state.set_current_neuron(Some("AVAL"));
        assert_eq!(state.start_time_of_current_tracklet(), Ok(Some(10)));
        assert_eq!(state.end_time_of_current_tracklet(), Ok(Some(20)));

        let saved = state.save_current_tracklet_to_current_neuron(false).unwrap();
        assert_eq!(saved, t1);
        assert_eq!(state.current_tracklet(), None);
        assert_eq!(state.previous_tracklet(), Some(t1.as_str()));

        state.set_current_tracklet(Some(t2.as_str())).unwrap();
        assert_eq!(state.current_conflicts().unwrap(), vec![ConflictKind::Time]);
        assert_eq!(state.time_of_next_conflict(0).unwrap(), Some((15, t1.clone())));
        assert_eq!(state.time_of_next_conflict(15).unwrap(), None);

        let right = state.split_current_tracklet(21, true).unwrap();
        assert_eq!(state.current_tracklet(), Some(right.as_str()));
        assert_eq!(state.start_time_of_current_tracklet(), Ok(Some(21)));
        state.save_current_tracklet_to_current_neuron(false).unwrap();
        assert!(state.tracklets_for_neuron("AVAL").contains(&right));
    }

    #[test]
    fn test_removal_helpers() {
        let (mut state, t1, t2, t3) = state();
        state.assign(&t1, "AVAL", false).unwrap();
        state.assign(&t3, "AVAL", false).unwrap();

        let removed = state.remove_tracklets_with_time_conflicts(&t2, "AVAL").unwrap();
        assert_eq!(removed, vec![t1.clone()]);
        assert_eq!(state.tracklets_for_neuron("AVAL"), &[t3.clone()]);

        state.assign(&t1, "AVAL", false).unwrap();
        let removed = state.remove_all_tracklets_after_time("AVAL", 25).unwrap();
        assert_eq!(removed, vec![t3.clone()]);

        assert_eq!(state.remove_tracklet_from_all_matches(&t1), Some("AVAL".to_string()));
        assert_eq!(state.remove_tracklet_from_all_matches(&t1), None);
        assert_eq!(
            state.remove_all_tracklets_after_time("nobody", 0),
            Err(TrackletError::UnknownIdentity("nobody".to_string()))
        );
    }

    #[test]
    fn test_with_identities_validates() {
        let mut set = TrackletSet::new();
        let t1 = set.push(span(10, 20));
        let t2 = set.push(span(15, 25));
        let ok = BTreeMap::from([("AVAL".to_string(), vec![t1.clone()])]);
        assert!(AnnotationState::with_identities(set.clone(), ok).is_ok());

        let overlapping = BTreeMap::from([("AVAL".to_string(), vec![t1.clone(), t2])]);
        assert!(matches!(
            AnnotationState::with_identities(set.clone(), overlapping),
            Err(TrackletError::Conflict(_))
        ));

        let unknown = BTreeMap::from([("AVAL".to_string(), vec!["nope".to_string()])]);
        assert_eq!(
            AnnotationState::with_identities(set, unknown),
            Err(TrackletError::UnknownTracklet("nope".to_string()))
        );
    }
}
