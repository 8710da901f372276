//! Globally unique node ids for (frame, point) pairs.
//!
//! Graph algorithms only see opaque [`NodeId`]s produced by a
//! [`FrameIndexCodec`]; raw local indices never enter a graph, so points of
//! two frames cannot collide.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

pub const DEFAULT_MODULUS: u64 = 10_000;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct NodeId(pub u64);

/// Either an encoded id or an already decoded `(frame, point)` tuple.
///
/// Some call sites pass decoded pairs through the same path as encoded ids,
/// so decoding accepts both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRef {
    Encoded(NodeId),
    Decoded(usize, usize),
}

impl From<NodeId> for NodeRef {
    fn from(id: NodeId) -> Self {
        NodeRef::Encoded(id)
    }
}

impl From<(usize, usize)> for NodeRef {
    fn from((frame, point): (usize, usize)) -> Self {
        NodeRef::Decoded(frame, point)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameIndexCodec {
    modulus: u64,
}

impl Default for FrameIndexCodec {
    fn default() -> Self {
        Self {
            modulus: DEFAULT_MODULUS,
        }
    }
}

impl FrameIndexCodec {
    pub fn new(modulus: u64) -> Self {
        debug_assert!(modulus > 0, "modulus must be positive");
        Self { modulus }
    }

    pub fn modulus(&self) -> u64 {
        self.modulus
    }

    /// `frame * modulus + point`. Points at or above the modulus are refused
    /// instead of bleeding into the next frame.
    pub fn encode(
        &self,
        frame_index: usize,
        point_index: usize,
    ) -> Result<NodeId, CodecError> {
        let point = point_index as u64;
        if point >= self.modulus {
            return Err(CodecError::PointIndexOverflow {
                point_index,
                modulus: self.modulus,
            });
        }
        (frame_index as u64)
            .checked_mul(self.modulus)
            .and_then(|base| base.checked_add(point))
            .map(NodeId)
            .ok_or(CodecError::FrameIndexOverflow { frame_index })
    }

    pub fn decode(&self, node: impl Into<NodeRef>) -> (usize, usize) {
        match node.into() {
            NodeRef::Encoded(NodeId(id)) => (
                (id / self.modulus) as usize,
                (id % self.modulus) as usize,
            ),
            NodeRef::Decoded(frame, point) => (frame, point),
        }
    }

    /// Checks that a connected set of nodes holds at most one point per frame.
    ///
    /// The size bounds are cheap and are tested before the duplicate scan.
    pub fn is_one_neuron_per_frame<I, N>(
        &self,
        nodes: I,
        min_size: Option<usize>,
        total_frames: Option<usize>,
    ) -> bool
    where
        I: IntoIterator<Item = N>,
        I::IntoIter: ExactSizeIterator,
        N: Into<NodeRef>,
    {
        let nodes = nodes.into_iter();
        let size = nodes.len();
        if total_frames.is_some_and(|total| size > total) {
            return false;
        }
        if min_size.is_some_and(|min| size < min) {
            return false;
        }

        let mut frames = HashSet::with_capacity(size);
        for node in nodes {
            let (frame, _) = self.decode(node);
            if !frames.insert(frame) {
                return false;
            }
        }
        true
    }
}
