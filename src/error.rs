use std::path::PathBuf;

use thiserror::Error;

use crate::annotation::AssignmentConflict;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CodecError {
    #[error(
        "point index {point_index} does not fit below the codec modulus {modulus}"
    )]
    PointIndexOverflow { point_index: usize, modulus: u64 },
    #[error("frame index {frame_index} overflows the node id space")]
    FrameIndexOverflow { frame_index: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MatchError {
    #[error("no candidate matches were given")]
    NoCandidates,
    #[error("frame {frame} has no detected points")]
    NoPoints { frame: usize },
    #[error("point arrays must have {expected} columns, but got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("frame {frame} has {points} points but {embeddings} embedding rows")]
    EmbeddingRowMismatch {
        frame: usize,
        points: usize,
        embeddings: usize,
    },
    #[error("cost matrix contains a non-finite value at ({row}, {col})")]
    NonFiniteCost { row: usize, col: usize },
    #[error(
        "candidate for frames ({found_a}, {found_b}) given to aggregator of frames ({expected_a}, {expected_b})"
    )]
    FramePairMismatch {
        expected_a: usize,
        expected_b: usize,
        found_a: usize,
        found_b: usize,
    },
    #[error("backend {0} needs feature embeddings on both frames")]
    MissingEmbedding(&'static str),
    #[error("Error: {0}")]
    Lapjv(String),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TrackletError {
    #[error("unknown tracklet {0}")]
    UnknownTracklet(String),
    #[error("unknown identity {0}")]
    UnknownIdentity(String),
    #[error("no tracklet is currently selected")]
    NoCurrentTracklet,
    #[error("no neuron is currently selected")]
    NoCurrentNeuron,
    #[error(
        "cannot split {name} at t={split_time}: tracklet spans {start}..={end}"
    )]
    InvalidSplit {
        name: String,
        split_time: usize,
        start: usize,
        end: usize,
    },
    #[error("{0}")]
    Conflict(AssignmentConflict),
    #[error("cannot merge {absorb} into {keep}: both cover frames {frames:?}")]
    TimeOverlap {
        keep: String,
        absorb: String,
        frames: Vec<usize>,
    },
    #[error("tracklet {0} already exists")]
    DuplicateName(String),
    #[error("stitched component {0:?} has more than one point in a frame")]
    InvalidComponent(Vec<(usize, usize)>),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("a save is already in progress")]
    SaveInProgress,
    #[error("no saved annotation found under {0}")]
    NothingSaved(PathBuf),
    #[error("background save thread panicked")]
    SaveThreadPanicked,
    #[error("saved annotation is inconsistent: {0}")]
    Inconsistent(#[from] TrackletError),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json error on {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
