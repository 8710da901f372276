//! Chaining pairwise matches into tracklets.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use tracing::{debug, info};

use super::{TrackletPoint, TrackletSet};
use crate::config::StitchingConfig;
use crate::error::TrackletError;
use crate::frame::Frame;
use crate::frame_index::{FrameIndexCodec, NodeId};
use crate::pipeline::PairwiseMatches;

/// Directed graph of accepted matches, earlier frame to later frame, over
/// codec node ids.
#[derive(Debug)]
pub struct TrackletGraph {
    graph: DiGraph<NodeId, f64>,
    nodes: HashMap<NodeId, NodeIndex>,
    codec: FrameIndexCodec,
}

impl TrackletGraph {
    pub fn new(codec: FrameIndexCodec) -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: HashMap::new(),
            codec,
        }
    }

    /// Every match with `confidence >= min_confidence`.
    pub fn from_pairwise(
        pairwise: &PairwiseMatches,
        codec: FrameIndexCodec,
        min_confidence: f64,
    ) -> Result<Self, TrackletError> {
        let mut graph = Self::new(codec);
        for (&(frame_a, frame_b), result) in &pairwise.matches {
            for ((point_a, point_b), confidence) in result.iter() {
                if confidence >= min_confidence {
                    graph.add_match((frame_a, point_a), (frame_b, point_b), confidence)?;
                }
            }
        }
        Ok(graph)
    }

    pub fn add_match(
        &mut self,
        (frame_a, point_a): (usize, usize),
        (frame_b, point_b): (usize, usize),
        confidence: f64,
    ) -> Result<(), TrackletError> {
        let a = self.node(self.codec.encode(frame_a, point_a)?);
        let b = self.node(self.codec.encode(frame_b, point_b)?);
        self.graph.update_edge(a, b, confidence);
        Ok(())
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

    pub fn codec(&self) -> &FrameIndexCodec {
        &self.codec
    }

    /// Connected groups of nodes with at most one node per frame.
    ///
    /// Edges are merged strongest first; an edge that would join two groups
    /// covering a common frame is skipped. Groups are sorted by their first
    /// node, and each group is sorted.
    pub fn components(&self) -> Vec<Vec<NodeId>> {
        let n = self.graph.node_count();
        let mut union_find = UnionFind::<usize>::new(n);
        let mut frames: Vec<BTreeSet<usize>> = self
            .graph
            .node_indices()
            .map(|idx| BTreeSet::from([self.codec.decode(self.graph[idx]).0]))
            .collect();

        let mut edges: Vec<(usize, usize, f64)> = self
            .graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), *e.weight()))
            .collect();
        edges.sort_by(|x, y| y.2.total_cmp(&x.2).then_with(|| (x.0, x.1).cmp(&(y.0, y.1))));

        let mut n_refused = 0;
        for (a, b, _) in edges {
            let (root_a, root_b) = (union_find.find(a), union_find.find(b));
            if root_a == root_b {
                continue;
            }
            if !frames[root_a].is_disjoint(&frames[root_b]) {
                n_refused += 1;
                continue;
            }
            union_find.union(root_a, root_b);
            let root = union_find.find(root_a);
            let absorbed = if root == root_a { root_b } else { root_a };
            let moved = std::mem::take(&mut frames[absorbed]);
            frames[root].extend(moved);
        }
        if n_refused > 0 {
            debug!(n_refused, "skipped matches that would repeat a frame");
        }

        let mut groups: BTreeMap<usize, Vec<NodeId>> = BTreeMap::new();
        for idx in self.graph.node_indices() {
            groups
                .entry(union_find.find(idx.index()))
                .or_default()
                .push(self.graph[idx]);
        }
        let mut components: Vec<Vec<NodeId>> = groups
            .into_values()
            .map(|mut group| {
                group.sort_unstable();
                group
            })
            .collect();
        components.sort_unstable_by_key(|group| group.first().copied());
        components
    }
}

/// Builds tracklets from all pairwise matches.
///
/// `frames` supplies the coordinates stored on each tracklet point; frames
/// missing from it leave the coordinates empty. Tracklets shorter than
/// `min_tracklet_length` are dropped, and the rest are named in order of
/// their first point.
pub fn stitch_tracklets(
    pairwise: &PairwiseMatches,
    frames: &[Frame],
    config: &StitchingConfig,
) -> Result<TrackletSet, TrackletError> {
    let codec = config.codec();
    let graph = TrackletGraph::from_pairwise(pairwise, codec, config.min_confidence)?;
    let positions: HashMap<usize, &Frame> = frames.iter().map(|f| (f.index, f)).collect();
    let total_frames = pairwise
        .matches
        .keys()
        .flat_map(|&(a, b)| [a, b])
        .collect::<BTreeSet<_>>()
        .len();

    let mut tracklets = TrackletSet::new();
    let mut n_short = 0;
    for component in graph.components() {
        if component.len() < config.min_tracklet_length {
            n_short += 1;
            continue;
        }
        if !codec.is_one_neuron_per_frame(component.iter().copied(), None, Some(total_frames)) {
            return Err(TrackletError::InvalidComponent(
                component.iter().map(|&id| codec.decode(id)).collect(),
            ));
        }
        tracklets.push(component.iter().map(|&id| {
            let (frame, point) = codec.decode(id);
            let zxy = positions.get(&frame).and_then(|f| f.position(point));
            (frame, TrackletPoint::new(point, zxy))
        }));
    }
    info!(
        n_nodes = graph.node_count(),
        n_edges = graph.edge_count(),
        n_tracklets = tracklets.len(),
        n_short,
        "stitched tracklets"
    );
    Ok(tracklets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::MatchResult;

    fn result(matches: &[(usize, usize)], confidences: &[f64]) -> MatchResult {
        MatchResult {
            matches: matches.to_vec(),
            confidences: confidences.to_vec(),
            raw_matches: matches.to_vec(),
        }
    }

    fn two_neurons(n_frames: usize) -> (PairwiseMatches, Vec<Frame>) {
        let mut pairwise = PairwiseMatches::default();
        for t in 1..n_frames {
            pairwise.insert(t - 1, t, result(&[(0, 1), (1, 0)], &[0.9, 0.8]));
        }
        // the two points swap rows every frame
        let frames = (0..n_frames)
            .map(|t| {
                let (a, b) = ([t as f64, 0.0, 0.0], [t as f64, 10.0, 0.0]);
                if t % 2 == 0 {
                    Frame::from_points(t, &[a, b])
                } else {
                    Frame::from_points(t, &[b, a])
                }
            })
            .collect();
        (pairwise, frames)
    }

    #[test]
    fn test_chains_consistent_matches() {
        let (pairwise, frames) = two_neurons(4);
        let set = stitch_tracklets(&pairwise, &frames, &StitchingConfig::default()).unwrap();
        assert_eq!(set.len(), 2);

        let first = set.get("tracklet_0000000").unwrap();
        let indices: Vec<usize> = first.points().map(|(_, p)| p.point_index).collect();
        assert_eq!(indices, vec![0, 1, 0, 1]);
        assert_eq!((first.start_time(), first.end_time()), (Some(0), Some(3)));
        for (t, p) in first.points() {
            assert_eq!(p.zxy, Some([t as f64, 0.0, 0.0]));
        }
    }

    #[test]
    fn test_conflicting_skip_match_is_repaired() {
        let mut pairwise = PairwiseMatches::default();
        pairwise.insert(0, 1, result(&[(0, 0)], &[0.9]));
        pairwise.insert(1, 2, result(&[(0, 0)], &[0.9]));
        // would put points 0 and 1 of frame 2 in the same tracklet
        pairwise.insert(0, 2, result(&[(0, 1)], &[0.5]));

        let config = StitchingConfig {
            min_tracklet_length: 2,
            ..Default::default()
        };
        let set = stitch_tracklets(&pairwise, &[], &config).unwrap();
        assert_eq!(set.len(), 1);
        let tracklet = set.iter().next().unwrap();
        assert_eq!(tracklet.len(), 3);
        assert_eq!(tracklet.get(2).map(|p| p.point_index), Some(0));
        assert_eq!(tracklet.get(1).and_then(|p| p.zxy), None);

        // with singletons kept the refused point becomes its own tracklet
        let set = stitch_tracklets(&pairwise, &[], &StitchingConfig::default()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_weak_matches_not_chained() {
        let mut pairwise = PairwiseMatches::default();
        pairwise.insert(0, 1, result(&[(0, 0)], &[0.9]));
        pairwise.insert(1, 2, result(&[(0, 0)], &[0.1]));
        let config = StitchingConfig {
            min_confidence: 0.5,
            ..Default::default()
        };
        let set = stitch_tracklets(&pairwise, &[], &config).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().end_time(), Some(1));
    }

    #[test]
    fn test_components_have_one_node_per_frame() {
        let (pairwise, _) = two_neurons(6);
        let codec = FrameIndexCodec::default();
        let graph = TrackletGraph::from_pairwise(&pairwise, codec, 0.0).unwrap();
        assert_eq!(graph.node_count(), 12);
        assert_eq!(graph.edge_count(), 10);
        for component in graph.components() {
            assert!(codec.is_one_neuron_per_frame(component.iter().copied(), None, Some(6)));
        }
    }

    #[test]
    fn test_codec_overflow_is_reported() {
        let mut pairwise = PairwiseMatches::default();
        pairwise.insert(0, 1, result(&[(0, 12)], &[0.9]));
        let config = StitchingConfig {
            codec_modulus: 10,
            ..Default::default()
        };
        let err = stitch_tracklets(&pairwise, &[], &config);
        assert!(matches!(err, Err(TrackletError::Codec(_))));
    }
}
