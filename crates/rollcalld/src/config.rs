use crate::engine::EngineSettings;
use crate::matching::{CandidateFailure, MatchStrategy};
use rollcall_core::onnx::{OnnxConfig, TensorLayout};
use rollcall_core::{DistanceMetric, FaceModel};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Face detection stage run before recognition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorBackend {
    #[default]
    Scrfd,
    /// Embed the whole image.
    Skip,
}

impl FromStr for DetectorBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scrfd" => Ok(DetectorBackend::Scrfd),
            "skip" => Ok(DetectorBackend::Skip),
            other => Err(format!("unknown detector backend: {other}")),
        }
    }
}

/// `ROLLCALL_TENSOR_LAYOUT` value.
struct LayoutArg(TensorLayout);

impl FromStr for LayoutArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nchw" => Ok(LayoutArg(TensorLayout::Nchw)),
            "nhwc" => Ok(LayoutArg(TensorLayout::Nhwc)),
            other => Err(format!("unknown tensor layout: {other}")),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 0.0.0.0:5000).
    pub bind: SocketAddr,
    /// Directory holding `<student_id>.jpg` files.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub model: FaceModel,
    /// Recognition model file, relative to `model_dir` unless absolute.
    pub recognizer_model: PathBuf,
    pub detector: DetectorBackend,
    /// SCRFD model file, relative to `model_dir` unless absolute.
    pub detector_model: PathBuf,
    pub layout: TensorLayout,
    pub metric: DistanceMetric,
    /// Overrides the model preset's threshold for `metric`.
    pub threshold: Option<f32>,
    pub strategy: MatchStrategy,
    pub candidate_failure: CandidateFailure,
    pub request_timeout_secs: u64,
    pub engine_queue: usize,
    pub max_body_bytes: usize,
}

/// Optional TOML overlay. Every key mirrors a `ROLLCALL_*` variable.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub bind: Option<SocketAddr>,
    pub data_dir: Option<PathBuf>,
    pub model_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub recognizer_model: Option<PathBuf>,
    pub detector: Option<DetectorBackend>,
    pub detector_model: Option<PathBuf>,
    pub layout: Option<TensorLayout>,
    pub distance_metric: Option<DistanceMetric>,
    pub threshold: Option<f32>,
    pub match_strategy: Option<MatchStrategy>,
    pub candidate_failure: Option<CandidateFailure>,
    pub request_timeout_secs: Option<u64>,
    pub engine_queue: Option<usize>,
    pub max_body_bytes: Option<usize>,
}

impl FileConfig {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = rollcall_core::default_data_dir();
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 5000)),
            data_dir: data_dir.join("faces"),
            model_dir: data_dir.join("models"),
            model: FaceModel::Facenet,
            recognizer_model: PathBuf::from("facenet.onnx"),
            detector: DetectorBackend::Scrfd,
            detector_model: PathBuf::from("det_10g.onnx"),
            layout: TensorLayout::Nchw,
            metric: DistanceMetric::Cosine,
            threshold: None,
            strategy: MatchStrategy::Scan,
            candidate_failure: CandidateFailure::Skip,
            request_timeout_secs: 30,
            engine_queue: 4,
            max_body_bytes: 50 * 1024 * 1024,
        }
    }
}

impl Config {
    /// Load from the file named by `ROLLCALL_CONFIG` (if any), then apply
    /// `ROLLCALL_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var_os("ROLLCALL_CONFIG") {
            Some(path) => Some(FileConfig::read(Path::new(&path))?),
            None => None,
        };
        Self::resolve(file.unwrap_or_default(), |key| std::env::var(key).ok())
    }

    /// Defaults, overlaid by `file`, overlaid by whatever `env` returns.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let d = Config::default();
        let model = match file.model {
            Some(raw) => parse_value("model", raw)?,
            None => d.model,
        };

        let mut config = Config {
            bind: file.bind.unwrap_or(d.bind),
            data_dir: file.data_dir.unwrap_or(d.data_dir),
            model_dir: file.model_dir.unwrap_or(d.model_dir),
            model,
            recognizer_model: file.recognizer_model.unwrap_or(d.recognizer_model),
            detector: file.detector.unwrap_or(d.detector),
            detector_model: file.detector_model.unwrap_or(d.detector_model),
            layout: file.layout.unwrap_or(d.layout),
            metric: file.distance_metric.unwrap_or(d.metric),
            threshold: file.threshold,
            strategy: file.match_strategy.unwrap_or(d.strategy),
            candidate_failure: file.candidate_failure.unwrap_or(d.candidate_failure),
            request_timeout_secs: file.request_timeout_secs.unwrap_or(d.request_timeout_secs),
            engine_queue: file.engine_queue.unwrap_or(d.engine_queue),
            max_body_bytes: file.max_body_bytes.unwrap_or(d.max_body_bytes),
        };

        if let Some(v) = env_parse::<SocketAddr>(&env, "ROLLCALL_BIND")? {
            config.bind = v;
        }
        if let Some(v) = env("ROLLCALL_DATA_DIR") {
            config.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_MODEL_DIR") {
            config.model_dir = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<FaceModel>(&env, "ROLLCALL_MODEL")? {
            config.model = v;
        }
        if let Some(v) = env("ROLLCALL_RECOGNIZER_MODEL") {
            config.recognizer_model = PathBuf::from(v);
        }
        if let Some(v) = env_parse::<DetectorBackend>(&env, "ROLLCALL_DETECTOR")? {
            config.detector = v;
        }
        if let Some(v) = env("ROLLCALL_DETECTOR_MODEL") {
            config.detector_model = PathBuf::from(v);
        }
        if let Some(LayoutArg(v)) = env_parse::<LayoutArg>(&env, "ROLLCALL_TENSOR_LAYOUT")? {
            config.layout = v;
        }
        if let Some(v) = env_parse::<DistanceMetric>(&env, "ROLLCALL_DISTANCE_METRIC")? {
            config.metric = v;
        }
        if let Some(v) = env_parse::<f32>(&env, "ROLLCALL_THRESHOLD")? {
            config.threshold = Some(v);
        }
        if let Some(v) = env_parse::<MatchStrategy>(&env, "ROLLCALL_MATCH_STRATEGY")? {
            config.strategy = v;
        }
        if let Some(v) = env_parse::<CandidateFailure>(&env, "ROLLCALL_CANDIDATE_FAILURE")? {
            config.candidate_failure = v;
        }
        if let Some(v) = env_parse::<u64>(&env, "ROLLCALL_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }
        if let Some(v) = env_parse::<usize>(&env, "ROLLCALL_ENGINE_QUEUE")? {
            config.engine_queue = v;
        }
        if let Some(v) = env_parse::<usize>(&env, "ROLLCALL_MAX_BODY_BYTES")? {
            config.max_body_bytes = v;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(ConfigError::Invalid {
                    key: "threshold",
                    value: t.to_string(),
                    reason: "must be a non-negative number".into(),
                });
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.engine_queue == 0 {
            return Err(ConfigError::Invalid {
                key: "engine_queue",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Threshold actually applied: the override, or the preset for `metric`.
    pub fn effective_threshold(&self) -> f32 {
        self.threshold.unwrap_or_else(|| self.model.threshold(self.metric))
    }

    pub fn recognizer_path(&self) -> PathBuf {
        self.model_dir.join(&self.recognizer_model)
    }

    pub fn detector_path(&self) -> Option<PathBuf> {
        match self.detector {
            DetectorBackend::Scrfd => Some(self.model_dir.join(&self.detector_model)),
            DetectorBackend::Skip => None,
        }
    }

    pub fn onnx(&self) -> OnnxConfig {
        OnnxConfig {
            model: self.model,
            recognizer_path: self.recognizer_path(),
            detector_path: self.detector_path(),
            layout: self.layout,
        }
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            strategy: self.strategy,
            on_failure: self.candidate_failure,
            queue: self.engine_queue,
            timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

fn parse_value<T>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value: raw,
    })
}

fn env_parse<T>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env(key).map(|raw| parse_value(key, raw)).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::resolve(FileConfig::default(), env_of(&[])).unwrap();
        assert_eq!(c.bind, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(c.model, FaceModel::Facenet);
        assert_eq!(c.metric, DistanceMetric::Cosine);
        assert_eq!(c.strategy, MatchStrategy::Scan);
        assert_eq!(c.candidate_failure, CandidateFailure::Skip);
        assert_eq!(c.effective_threshold(), 0.40);
        assert_eq!(c.max_body_bytes, 52_428_800);
        assert!(c.data_dir.ends_with("rollcall/faces"));
    }

    #[test]
    fn test_env_overrides_file() {
        let file: FileConfig = toml::from_str(
            r#"
            match_strategy = "search"
            distance_metric = "euclidean_l2"
            model = "ArcFace"
            model_dir = "/opt/models"
            threshold = 0.9
            "#,
        )
        .unwrap();
        let c = Config::resolve(
            file,
            env_of(&[("ROLLCALL_MATCH_STRATEGY", "scan"), ("ROLLCALL_DETECTOR", "skip")]),
        )
        .unwrap();

        assert_eq!(c.strategy, MatchStrategy::Scan);
        assert_eq!(c.metric, DistanceMetric::EuclideanL2);
        assert_eq!(c.model, FaceModel::ArcFace);
        assert_eq!(c.effective_threshold(), 0.9);
        assert_eq!(c.detector_path(), None);
        assert_eq!(c.recognizer_path(), PathBuf::from("/opt/models/facenet.onnx"));
    }

    #[test]
    fn test_preset_threshold_follows_metric() {
        let c = Config::resolve(
            FileConfig::default(),
            env_of(&[("ROLLCALL_MODEL", "facenet512"), ("ROLLCALL_DISTANCE_METRIC", "euclidean")]),
        )
        .unwrap();
        assert_eq!(c.effective_threshold(), 23.56);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let env = env_of(&[("ROLLCALL_MATCH_STRATEGY", "best")]);
        let err = Config::resolve(FileConfig::default(), env).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { key: "ROLLCALL_MATCH_STRATEGY", .. }),
            "got {err:?}"
        );

        let env = env_of(&[("ROLLCALL_THRESHOLD", "-1")]);
        let err = Config::resolve(FileConfig::default(), env).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "threshold", .. }), "got {err:?}");

        assert!(toml::from_str::<FileConfig>("unknown_key = 1").is_err());
    }

    #[test]
    fn test_absolute_model_paths_kept() {
        let c = Config::resolve(
            FileConfig::default(),
            env_of(&[("ROLLCALL_DETECTOR_MODEL", "/srv/scrfd.onnx")]),
        )
        .unwrap();
        assert_eq!(c.detector_path(), Some(PathBuf::from("/srv/scrfd.onnx")));
    }
}
