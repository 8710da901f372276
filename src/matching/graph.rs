//! Maximum-weight bipartite matching on an explicit graph.
//!
//! Side A holds frame-0 points, side B frame-1 points. Both sides go
//! through the [`FrameIndexCodec`] first, so their ids live in disjoint
//! ranges and the graph never sees a raw local index.

use std::collections::HashMap;

use nalgebra::DMatrix;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;

use super::MatchResult;
use crate::candidates::CandidateMatch;
use crate::error::MatchError;
use crate::frame_index::{FrameIndexCodec, NodeId};
use crate::lapjv::linear_sum_assignment;

const SIDE_A: usize = 0;
const SIDE_B: usize = 1;

/// Undirected weighted bipartite graph over codec ids.
#[derive(Debug, Default)]
pub struct BipartiteGraph {
    graph: UnGraph<NodeId, f64>,
    nodes: HashMap<NodeId, NodeIndex>,
}

impl BipartiteGraph {
    pub fn from_candidates(
        candidates: &[CandidateMatch],
        codec: &FrameIndexCodec,
    ) -> Result<Self, MatchError> {
        let mut graph = Self::default();
        for c in candidates {
            let a = graph.node(codec.encode(SIDE_A, c.point_a)?);
            let b = graph.node(codec.encode(SIDE_B, c.point_b)?);
            // a repeated pair overwrites the previous weight
            graph.graph.update_edge(a, b, c.confidence);
        }
        Ok(graph)
    }

    fn node(&mut self, id: NodeId) -> NodeIndex {
        *self
            .nodes
            .entry(id)
            .or_insert_with(|| self.graph.add_node(id))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Maximum-cardinality matching with maximum total weight among those.
    ///
    /// Returned pairs are `(smaller id, larger id)` with their edge weight.
    pub fn max_weight_matching(
        &self,
        codec: &FrameIndexCodec,
    ) -> Result<Vec<((NodeId, NodeId), f64)>, MatchError> {
        let mut side_a = Vec::new();
        let mut side_b = Vec::new();
        for idx in self.graph.node_indices() {
            let id = self.graph[idx];
            match codec.decode(id).0 {
                SIDE_A => side_a.push(idx),
                _ => side_b.push(idx),
            }
        }
        if side_a.is_empty() || side_b.is_empty() {
            return Ok(Vec::new());
        }
        let row_of: HashMap<NodeIndex, usize> =
            side_a.iter().enumerate().map(|(i, &n)| (n, i)).collect();
        let col_of: HashMap<NodeIndex, usize> =
            side_b.iter().enumerate().map(|(j, &n)| (n, j)).collect();

        // Each real edge is worth `bonus` more than any set of weights can
        // add up to, so a larger matching always wins over a heavier one.
        let bonus = 1.0
            + self
                .graph
                .edge_references()
                .map(|e| e.weight().abs())
                .sum::<f64>();
        let mut cost = DMatrix::<f64>::zeros(side_a.len(), side_b.len());
        let mut is_edge = DMatrix::<bool>::from_element(side_a.len(), side_b.len(), false);
        for e in self.graph.edge_references() {
            let (u, v) = (e.source(), e.target());
            let (a, b) = if row_of.contains_key(&u) { (u, v) } else { (v, u) };
            let (i, j) = (row_of[&a], col_of[&b]);
            cost[(i, j)] = -(e.weight() + bonus);
            is_edge[(i, j)] = true;
        }

        let mut matching = Vec::new();
        for (i, j) in linear_sum_assignment(&cost)? {
            if !is_edge[(i, j)] {
                continue;
            }
            let (a, b) = (side_a[i], side_b[j]);
            let Some(edge) = self.graph.find_edge(a, b) else {
                continue;
            };
            let (x, y) = (self.graph[a], self.graph[b]);
            let pair = if x <= y { (x, y) } else { (y, x) };
            matching.push((pair, self.graph[edge]));
        }
        Ok(matching)
    }
}

/// Globally optimal one-to-one matches from weighted candidates via a
/// maximum-weight matching on their bipartite graph.
///
/// Unweighted candidates should carry confidence 1
/// ([`CandidateMatch::unweighted`]).
pub fn bipartite_graph_matches(
    candidates: &[CandidateMatch],
    codec: &FrameIndexCodec,
) -> Result<MatchResult, MatchError> {
    if candidates.is_empty() {
        return Err(MatchError::NoCandidates);
    }
    let graph = BipartiteGraph::from_candidates(candidates, codec)?;

    let mut pairs: Vec<((usize, usize), f64)> = graph
        .max_weight_matching(codec)?
        .into_iter()
        .map(|((small, large), w)| {
            let (_, point_a) = codec.decode(small);
            let (_, point_b) = codec.decode(large);
            ((point_a, point_b), w)
        })
        .collect();
    pairs.sort_by_key(|&(m, _)| m);

    let (matches, confidences): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
    Ok(MatchResult {
        raw_matches: matches.clone(),
        matches,
        confidences,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(a: usize, b: usize, conf: f64) -> CandidateMatch {
        CandidateMatch::new(0, 1, a, b, conf)
    }

    #[test]
    fn test_graph_keeps_sides_disjoint() {
        // point 0 exists on both sides; the graph must hold two nodes for it
        let codec = FrameIndexCodec::default();
        let graph = BipartiteGraph::from_candidates(&[c(0, 0, 1.0)], &codec).unwrap();
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_max_weight_matching() {
        let codec = FrameIndexCodec::default();
        let candidates = vec![c(0, 0, 0.9), c(0, 1, 0.8), c(1, 0, 0.8), c(1, 1, 0.1)];
        let result = bipartite_graph_matches(&candidates, &codec).unwrap();
        assert_eq!(result.matches, vec![(0, 1), (1, 0)]);
        assert_eq!(result.confidences, vec![0.8, 0.8]);
        assert_eq!(result.raw_matches, result.matches);
    }

    #[test]
    fn test_cardinality_beats_weight() {
        // (0, 0) alone weighs 10, but two matches are possible without it
        let codec = FrameIndexCodec::default();
        let candidates = vec![c(0, 0, 10.0), c(0, 1, 0.1), c(1, 0, 0.1)];
        let result = bipartite_graph_matches(&candidates, &codec).unwrap();
        assert_eq!(result.matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn test_unweighted_candidates() {
        let codec = FrameIndexCodec::default();
        let candidates = vec![
            CandidateMatch::unweighted(0, 1, 0, 5),
            CandidateMatch::unweighted(0, 1, 1, 5),
            CandidateMatch::unweighted(0, 1, 1, 6),
        ];
        let result = bipartite_graph_matches(&candidates, &codec).unwrap();
        assert_eq!(result.matches, vec![(0, 5), (1, 6)]);
        assert_eq!(result.confidences, vec![1.0, 1.0]);
    }

    #[test]
    fn test_duplicate_edge_takes_last_weight() {
        let codec = FrameIndexCodec::default();
        let candidates = vec![c(0, 0, 0.2), c(0, 0, 0.7)];
        let result = bipartite_graph_matches(&candidates, &codec).unwrap();
        assert_eq!(result.confidences, vec![0.7]);
    }

    #[test]
    fn test_point_index_overflow_propagates() {
        let codec = FrameIndexCodec::new(10);
        let err = bipartite_graph_matches(&[c(0, 10, 1.0)], &codec);
        assert!(matches!(err, Err(MatchError::Codec(_))));
    }

    #[test]
    fn test_empty_candidates() {
        let codec = FrameIndexCodec::default();
        assert_eq!(
            bipartite_graph_matches(&[], &codec),
            Err(MatchError::NoCandidates)
        );
    }
}
