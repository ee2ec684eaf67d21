//! Build and streaming settings, loadable from YAML or JSON.

use std::path::Path;

use meshstream_common::HIGH_COVERAGE_CUTOFF;
use meshstream_decimate::{DEFAULT_ANGLE_THRESHOLD_DEGREES, default_worker_count};
use meshstream_merge::{MergeSettings, VERTEX_BATCH_SIZE};
use meshstream_octree::{MAX_DEPTH, OctreeConfig};
use meshstream_stream::StreamingConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported config format {0:?} (expected .yaml, .yml or .json)")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Import-time coverage estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageSettings {
    /// Orbit radius of the reference camera used at import.
    pub build_camera_radius: f32,
    pub render_width: f32,
    pub high_coverage_cutoff: f32,
}

impl Default for CoverageSettings {
    fn default() -> Self {
        Self {
            build_camera_radius: 100.0,
            render_width: 1920.0,
            high_coverage_cutoff: HIGH_COVERAGE_CUTOFF,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecimationSettings {
    pub angle_threshold_degrees: f32,
    pub worker_count: usize,
    pub queue_capacity: usize,
}

impl Default for DecimationSettings {
    fn default() -> Self {
        Self {
            angle_threshold_degrees: DEFAULT_ANGLE_THRESHOLD_DEGREES,
            worker_count: default_worker_count(),
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeBatching {
    /// Octree nodes merged and written per chunk.
    pub node_chunk_size: usize,
    pub vertex_batch_size: usize,
}

impl Default for MergeBatching {
    fn default() -> Self {
        Self {
            node_chunk_size: 10,
            vertex_batch_size: VERTEX_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Files imported before results are drained and stored.
    pub file_batch_size: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self { file_batch_size: 5 }
    }
}

/// Everything the build pipeline and viewer need. Every field has a default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LodConfig {
    pub octree: OctreeConfig,
    pub coverage: CoverageSettings,
    pub decimation: DecimationSettings,
    pub merge: MergeBatching,
    pub import: ImportSettings,
    pub streaming: StreamingConfig,
}

impl LodConfig {
    /// Load from a `.yaml`/`.yml` or `.json` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let config = match ext.as_str() {
            "yaml" | "yml" => Self::from_yaml_str(&text)?,
            "json" => Self::from_json_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));
        if self.octree.max_depth > MAX_DEPTH {
            return invalid(format!(
                "octree.max_depth {} exceeds {MAX_DEPTH}",
                self.octree.max_depth
            ));
        }
        let angle = self.decimation.angle_threshold_degrees;
        if !(angle > 0.0 && angle < 90.0) {
            return invalid(format!("decimation.angle_threshold_degrees {angle} not in (0, 90)"));
        }
        if self.coverage.build_camera_radius <= 0.0 {
            return invalid("coverage.build_camera_radius must be positive".into());
        }
        if self.merge.node_chunk_size == 0 || self.merge.vertex_batch_size == 0 {
            return invalid("merge chunk sizes must be positive".into());
        }
        if self.import.file_batch_size == 0 {
            return invalid("import.file_batch_size must be positive".into());
        }
        let s = &self.streaming;
        if !(s.load_band > 0.0 && s.load_band <= 1.0) {
            return invalid(format!("streaming.load_band {} not in (0, 1]", s.load_band));
        }
        if s.max_concurrent_loads == 0 {
            return invalid("streaming.max_concurrent_loads must be positive".into());
        }
        if s.distance_threshold.is_some_and(|t| t <= 0.0) {
            return invalid("streaming.distance_threshold must be positive".into());
        }
        Ok(())
    }

    pub fn merge_settings(&self) -> MergeSettings {
        MergeSettings {
            high_coverage_cutoff: self.coverage.high_coverage_cutoff,
            vertex_batch_size: self.merge.vertex_batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let c = LodConfig::from_yaml_str("{}").unwrap();
        assert_eq!(c.octree.max_depth, 4);
        assert_eq!(c.coverage.build_camera_radius, 100.0);
        assert_eq!(c.decimation.angle_threshold_degrees, 3.0);
        assert!(c.decimation.worker_count >= 2);
        assert_eq!(c.merge.node_chunk_size, 10);
        assert_eq!(c.import.file_batch_size, 5);
        assert_eq!(c.streaming.max_concurrent_loads, 5);
    }

    #[test]
    fn partial_yaml_overrides_only_named_fields() {
        let c = LodConfig::from_yaml_str(
            "octree:\n  max_depth: 3\nstreaming:\n  distance_threshold: 250.0\n",
        )
        .unwrap();
        assert_eq!(c.octree.max_depth, 3);
        assert_eq!(c.octree.min_split_records, 0);
        assert_eq!(c.streaming.distance_threshold, Some(250.0));
        assert_eq!(c.streaming.load_band, 0.8);
    }

    #[test]
    fn json_and_yaml_agree() {
        let yaml = LodConfig::from_yaml_str("decimation:\n  angle_threshold_degrees: 5.0\n").unwrap();
        let json = LodConfig::from_json_str(r#"{"decimation":{"angle_threshold_degrees":5.0}}"#).unwrap();
        assert_eq!(yaml.decimation.angle_threshold_degrees, json.decimation.angle_threshold_degrees);
    }

    #[test]
    fn yaml_round_trips() {
        let c = LodConfig::default();
        let back = LodConfig::from_yaml_str(&c.to_yaml().unwrap()).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            LodConfig::from_yaml_str("decimation:\n  angle_threshold_degrees: 120.0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LodConfig::from_yaml_str("merge:\n  node_chunk_size: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            LodConfig::from_yaml_str("octree:\n  max_depth: 8\n"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn from_path_picks_format_by_extension() {
        let tmp = tempfile::tempdir().unwrap();
        let yaml = tmp.path().join("lod.yaml");
        std::fs::write(&yaml, "octree:\n  max_depth: 2\n").unwrap();
        assert_eq!(LodConfig::from_path(&yaml).unwrap().octree.max_depth, 2);

        let toml = tmp.path().join("lod.toml");
        std::fs::write(&toml, "").unwrap();
        assert!(matches!(
            LodConfig::from_path(&toml),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }
}
