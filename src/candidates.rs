//! Candidate correspondences and their aggregation.
//!
//! Several matchers (or repeated observations of the same frame pair) each
//! propose candidates. Candidates for the same point pair are summed, as
//! independent evidence for one hypothesis, and the summed problem is then
//! resolved globally by linear assignment.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MatchError;
use crate::matching::hungarian::bipartite_from_candidates;
use crate::matching::MatchResult;

/*-----------------------------------------------------------------------------
CandidateMatch
-----------------------------------------------------------------------------*/

/// An unverified proposed correspondence. Duplicates are expected.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateMatch {
    pub frame_a: usize,
    pub frame_b: usize,
    pub point_a: usize,
    pub point_b: usize,
    pub confidence: f64,
}

impl CandidateMatch {
    pub fn new(
        frame_a: usize,
        frame_b: usize,
        point_a: usize,
        point_b: usize,
        confidence: f64,
    ) -> Self {
        Self {
            frame_a,
            frame_b,
            point_a,
            point_b,
            confidence,
        }
    }

    /// A candidate without a score; weighs 1.
    pub fn unweighted(frame_a: usize, frame_b: usize, point_a: usize, point_b: usize) -> Self {
        Self::new(frame_a, frame_b, point_a, point_b, 1.0)
    }

    pub fn from_match_result(frame_a: usize, frame_b: usize, result: &MatchResult) -> Vec<Self> {
        result
            .iter()
            .map(|((a, b), c)| Self::new(frame_a, frame_b, a, b, c))
            .collect()
    }

    pub fn points(&self) -> (usize, usize) {
        (self.point_a, self.point_b)
    }
}

/*-----------------------------------------------------------------------------
CandidateAggregator
-----------------------------------------------------------------------------*/

/// Collects candidates of one frame pair from any number of sources.
///
/// The two thresholds are independent: `min_confidence_before_sum` drops
/// single noisy candidates before they can accumulate, while
/// `min_confidence_after_sum` drops weak aggregate evidence.
#[derive(Debug, Clone)]
pub struct CandidateAggregator {
    frame_a: usize,
    frame_b: usize,
    min_confidence_before_sum: f64,
    min_confidence_after_sum: f64,
    candidates: Vec<CandidateMatch>,
}

impl CandidateAggregator {
    pub fn new(
        frame_a: usize,
        frame_b: usize,
        min_confidence_before_sum: f64,
        min_confidence_after_sum: f64,
    ) -> Self {
        Self {
            frame_a,
            frame_b,
            min_confidence_before_sum,
            min_confidence_after_sum,
            candidates: Vec::new(),
        }
    }

    pub fn frames(&self) -> (usize, usize) {
        (self.frame_a, self.frame_b)
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn push(&mut self, candidate: CandidateMatch) -> Result<(), MatchError> {
        if (candidate.frame_a, candidate.frame_b) != (self.frame_a, self.frame_b) {
            return Err(MatchError::FramePairMismatch {
                expected_a: self.frame_a,
                expected_b: self.frame_b,
                found_a: candidate.frame_a,
                found_b: candidate.frame_b,
            });
        }
        self.candidates.push(candidate);
        Ok(())
    }

    pub fn extend<I>(&mut self, candidates: I) -> Result<(), MatchError>
    where
        I: IntoIterator<Item = CandidateMatch>,
    {
        for candidate in candidates {
            self.push(candidate)?;
        }
        Ok(())
    }

    pub fn extend_from_match_result(&mut self, result: &MatchResult) -> Result<(), MatchError> {
        self.extend(CandidateMatch::from_match_result(
            self.frame_a,
            self.frame_b,
            result,
        ))
    }

    pub fn candidates(&self) -> &[CandidateMatch] {
        &self.candidates
    }

    /// Sums duplicate candidates and resolves the frame pair globally.
    pub fn resolve(&self) -> Result<MatchResult, MatchError> {
        debug!(
            frame_a = self.frame_a,
            frame_b = self.frame_b,
            n_candidates = self.candidates.len(),
            "resolving candidate matches"
        );
        bipartite_from_candidates(
            &self.candidates,
            self.min_confidence_before_sum,
            self.min_confidence_after_sum,
        )
    }
}
