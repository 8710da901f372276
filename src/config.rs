use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::frame_index::{FrameIndexCodec, DEFAULT_MODULUS};
use crate::matching::icp::IcpParams;

/*-----------------------------------------------------------------------------
Matching backend
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatcherBackend {
    /// Maximum-cardinality maximum-weight matching on a bipartite graph
    /// built from nearest-neighbor candidates.
    GraphMaxWeight,
    /// Summed candidates (geometry and, if present, embeddings) resolved by
    /// linear assignment.
    #[default]
    Hungarian,
    /// Linear assignment directly on the Euclidean distance matrix.
    Positions,
    NearestNeighbor,
    Icp,
    /// Softmax matching of feature embeddings.
    Embedding,
}

impl MatcherBackend {
    pub fn name(&self) -> &'static str {
        match self {
            MatcherBackend::GraphMaxWeight => "graph_max_weight",
            MatcherBackend::Hungarian => "hungarian",
            MatcherBackend::Positions => "positions",
            MatcherBackend::NearestNeighbor => "nearest_neighbor",
            MatcherBackend::Icp => "icp",
            MatcherBackend::Embedding => "embedding",
        }
    }
}

/*-----------------------------------------------------------------------------
MatchingConfig
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    pub backend: MatcherBackend,
    pub min_confidence_before_sum: f64,
    pub min_confidence_after_sum: f64,
    /// Distance cutoff for nearest-neighbor and ICP correspondences.
    pub max_dist: f64,
    /// Also apply `max_dist` to the positional Hungarian backend.
    pub filter_positions_by_max_dist: bool,
    pub n_neighbors: usize,
    /// Final filter applied to every backend's output.
    pub match_confidence_threshold: f64,
    /// Length scale of the distance to confidence conversion.
    pub gamma: f64,
    pub icp_max_iterations: usize,
    pub icp_relative_fitness: f64,
    pub icp_relative_rmse: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        let icp = IcpParams::default();
        Self {
            backend: MatcherBackend::default(),
            min_confidence_before_sum: 1e-3,
            min_confidence_after_sum: 1e-3,
            max_dist: icp.max_correspondence_distance,
            filter_positions_by_max_dist: false,
            n_neighbors: 1,
            match_confidence_threshold: 0.0,
            gamma: 1.0,
            icp_max_iterations: icp.max_iterations,
            icp_relative_fitness: icp.relative_fitness,
            icp_relative_rmse: icp.relative_rmse,
        }
    }
}

impl MatchingConfig {
    pub fn icp_params(&self) -> IcpParams {
        IcpParams {
            max_correspondence_distance: self.max_dist,
            max_iterations: self.icp_max_iterations,
            relative_fitness: self.icp_relative_fitness,
            relative_rmse: self.icp_relative_rmse,
        }
    }

    pub fn positions_max_dist(&self) -> Option<f64> {
        self.filter_positions_by_max_dist.then_some(self.max_dist)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_dist > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "max_dist must be positive, got {}",
                self.max_dist
            )));
        }
        if !(self.gamma > 0.0) || !self.gamma.is_finite() {
            return Err(ConfigError::Invalid(format!(
                "gamma must be positive and finite, got {}",
                self.gamma
            )));
        }
        if self.n_neighbors == 0 {
            return Err(ConfigError::Invalid(
                "n_neighbors must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("min_confidence_before_sum", self.min_confidence_before_sum),
            ("min_confidence_after_sum", self.min_confidence_after_sum),
            ("match_confidence_threshold", self.match_confidence_threshold),
        ] {
            if !value.is_finite() {
                return Err(ConfigError::Invalid(format!(
                    "{} must be finite, got {}",
                    name, value
                )));
            }
        }
        Ok(())
    }
}

/*-----------------------------------------------------------------------------
StitchingConfig
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitchingConfig {
    /// Pairwise matches below this confidence are not chained.
    pub min_confidence: f64,
    pub min_tracklet_length: usize,
    pub codec_modulus: u64,
}

impl Default for StitchingConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.0,
            min_tracklet_length: 1,
            codec_modulus: DEFAULT_MODULUS,
        }
    }
}

impl StitchingConfig {
    pub fn codec(&self) -> FrameIndexCodec {
        FrameIndexCodec::new(self.codec_modulus)
    }
}

/*-----------------------------------------------------------------------------
TrackingConfig
-----------------------------------------------------------------------------*/

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub matching: MatchingConfig,
    pub stitching: StitchingConfig,
}

impl TrackingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: TrackingConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.matching.validate()?;
        if self.stitching.codec_modulus == 0 {
            return Err(ConfigError::Invalid(
                "codec_modulus must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
