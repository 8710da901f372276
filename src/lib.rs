pub mod annotation;
pub mod candidates;
pub mod confidence;
pub mod config;
pub mod error;
pub mod frame;
pub mod frame_index;
pub mod lapjv;
pub mod matching;
pub mod pipeline;
pub mod tracklet;

pub use annotation::{AnnotationState, AssignmentConflict, ConflictKind, TrackletAnnotator};
pub use candidates::{CandidateAggregator, CandidateMatch};
pub use config::{MatcherBackend, MatchingConfig, StitchingConfig, TrackingConfig};
pub use error::{CodecError, ConfigError, MatchError, PersistError, TrackletError};
pub use frame::{Frame, Zxy};
pub use frame_index::{FrameIndexCodec, NodeId, NodeRef};
pub use matching::{match_frame_pair, MatchResult};
pub use pipeline::{match_all_adjacent_frames, match_frame_pairs, PairwiseMatches};
pub use tracklet::{stitch_tracklets, Tracklet, TrackletPoint, TrackletSet};
