//! Configuration of the decision engine and the classifier.
//!
//! Thresholds, vocabularies and budgets are deployment data loaded from a JSON file. The raw
//! [`EngineConfig`] is validated once into a [`DecisionConfig`]; a malformed file fails before
//! any frame is processed.
use std::{collections::HashMap, fs, path::Path, time::Duration};

use serde::Deserialize;

use crate::{
    error::{Error, Result},
    normalize::{normalize, LabelBook, NormalizedLabel},
};

const DEFAULT_FRAME_LIMIT: i64 = 200;

/// Whole server config file.
#[derive(Clone, Debug, Deserialize)]
pub struct ServerConfig {
    pub model: ModelConfig,
    pub decision: EngineConfig,
}

impl ServerConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::Config(format!("invalid config: {e}")))
    }
}

/// Classifier collaborator settings.
#[derive(Clone, Debug, Deserialize)]
pub struct ModelConfig {
    /// Filesystem path or `http(s)://` URL of the ONNX model.
    pub source: String,
    /// Class index to display label.
    pub labels: Vec<String>,
    #[serde(default = "default_input_width")]
    pub input_width: u32,
    #[serde(default = "default_input_height")]
    pub input_height: u32,
    #[serde(default = "default_half")]
    pub min_confidence: f32,
    #[serde(default = "default_half")]
    pub max_iou: f32,
}

fn default_input_width() -> u32 {
    640
}

fn default_input_height() -> u32 {
    480
}

fn default_half() -> f32 {
    0.5
}

/// How to resolve several labels crossing their thresholds on the same frame.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// Largest evidence above threshold first, then ascending normalized name.
    #[default]
    ExcessThenName,
    /// Ascending normalized name only.
    Name,
}

/// What one detection contributes to its label's evidence.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Weighting {
    /// Every detection counts 1.
    #[default]
    Count,
    /// Every detection counts its confidence.
    Confidence,
}

/// Decision engine settings as written in the config file.
#[derive(Clone, Debug, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub thresholds: HashMap<String, i64>,
    #[serde(default)]
    pub default_threshold: Option<i64>,
    #[serde(default = "default_frame_limit")]
    pub frame_limit: i64,
    #[serde(default)]
    pub time_budget_ms: Option<u64>,
    #[serde(default)]
    pub tie_break: TieBreak,
    #[serde(default)]
    pub weighting: Weighting,
    #[serde(default)]
    pub min_confidence: f32,
    /// Explicit display spellings, overriding the classifier's label table.
    #[serde(default)]
    pub display_labels: Vec<String>,
}

fn default_frame_limit() -> i64 {
    DEFAULT_FRAME_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            thresholds: HashMap::new(),
            default_threshold: None,
            frame_limit: DEFAULT_FRAME_LIMIT,
            time_budget_ms: None,
            tie_break: TieBreak::default(),
            weighting: Weighting::default(),
            min_confidence: 0.0,
            display_labels: vec![],
        }
    }
}

/// Per-label thresholds keyed by normalized label.
#[derive(Clone, Debug, Default)]
pub struct ThresholdTable {
    table: HashMap<NormalizedLabel, u32>,
    default: Option<u32>,
}

impl ThresholdTable {
    /// Threshold for `label`, `None` if the label can never trigger a threshold stop.
    pub fn threshold_for(&self, label: &NormalizedLabel) -> Option<u32> {
        self.table.get(label).copied().or(self.default)
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

/// Validated, immutable decision engine settings.
#[derive(Clone, Debug)]
pub struct DecisionConfig {
    pub thresholds: ThresholdTable,
    pub frame_limit: usize,
    pub time_budget: Option<Duration>,
    pub tie_break: TieBreak,
    pub weighting: Weighting,
    pub min_confidence: f32,
    /// Raw spellings of the threshold keys, sorted.
    pub threshold_labels: Vec<String>,
    /// Display spellings from the config, in file order.
    pub display_labels: Vec<String>,
}

impl DecisionConfig {
    /// Same config with a different frame budget.
    pub fn with_frame_limit(&self, frame_limit: usize) -> Self {
        Self {
            frame_limit: frame_limit.max(1),
            ..self.clone()
        }
    }

    /// Register the threshold keys and explicit display forms of this config.
    pub fn register_labels(&self, book: &mut LabelBook) {
        for raw in &self.threshold_labels {
            book.register(raw);
        }
        for display in &self.display_labels {
            book.set_display(display);
        }
    }
}

impl TryFrom<EngineConfig> for DecisionConfig {
    type Error = Error;

    fn try_from(raw: EngineConfig) -> Result<Self> {
        let mut table: HashMap<NormalizedLabel, u32> = HashMap::with_capacity(raw.thresholds.len());

        // Sorted so that conflict errors name the same pair on every run
        let mut entries: Vec<_> = raw.thresholds.iter().collect();
        entries.sort();

        let threshold_labels = entries.iter().map(|(label, _)| label.to_string()).collect();

        for (label, &threshold) in entries {
            let threshold = positive("threshold", label, threshold)?;
            let key = normalize(label);
            if key.as_str().is_empty() {
                return Err(Error::Config("threshold with an empty label".into()));
            }
            match table.get(&key) {
                Some(&existing) if existing != threshold => {
                    return Err(Error::Config(format!(
                        "label {label:?} normalizes to {key:?} which already has threshold {existing}"
                    )));
                }
                _ => {
                    table.insert(key, threshold);
                }
            }
        }

        let default = raw
            .default_threshold
            .map(|t| positive("default_threshold", "*", t))
            .transpose()?;

        let frame_limit = positive("frame_limit", "*", raw.frame_limit)? as usize;

        if !(0.0..=1.0).contains(&raw.min_confidence) {
            return Err(Error::Config(format!(
                "min_confidence {} outside [0, 1]",
                raw.min_confidence
            )));
        }

        Ok(Self {
            thresholds: ThresholdTable { table, default },
            frame_limit,
            time_budget: raw.time_budget_ms.map(Duration::from_millis),
            tie_break: raw.tie_break,
            weighting: raw.weighting,
            min_confidence: raw.min_confidence,
            threshold_labels,
            display_labels: raw.display_labels,
        })
    }
}

fn positive(field: &str, label: &str, value: i64) -> Result<u32> {
    if value < 1 {
        return Err(Error::Config(format!(
            "{field} for {label:?} must be at least 1, got {value}"
        )));
    }
    u32::try_from(value).map_err(|_| Error::Config(format!("{field} for {label:?} too large")))
}

#[cfg(test)]
mod test {

    use super::*;

    fn engine_config(thresholds: &[(&str, i64)]) -> EngineConfig {
        EngineConfig {
            thresholds: thresholds
                .iter()
                .map(|(label, t)| (label.to_string(), *t))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_thresholds_are_normalized() -> Result<()> {
        let config = DecisionConfig::try_from(engine_config(&[("Buenos Días", 16)]))?;

        assert_eq!(
            config.thresholds.threshold_for(&normalize("buenos dias")),
            Some(16)
        );
        assert_eq!(config.thresholds.threshold_for(&normalize("hola")), None);

        Ok(())
    }

    #[test]
    fn test_default_threshold_applies_to_unlisted() -> Result<()> {
        let mut raw = engine_config(&[("Hola", 17)]);
        raw.default_threshold = Some(4);
        let config = DecisionConfig::try_from(raw)?;

        assert_eq!(config.thresholds.threshold_for(&normalize("Hola")), Some(17));
        assert_eq!(config.thresholds.threshold_for(&normalize("Gracias")), Some(4));

        Ok(())
    }

    #[test]
    fn test_rejects_malformed() {
        let negative = engine_config(&[("Hola", -1)]);
        assert!(matches!(DecisionConfig::try_from(negative), Err(Error::Config(_))));

        let zero = engine_config(&[("Hola", 0)]);
        assert!(matches!(DecisionConfig::try_from(zero), Err(Error::Config(_))));

        let mut no_frames = engine_config(&[]);
        no_frames.frame_limit = 0;
        assert!(matches!(DecisionConfig::try_from(no_frames), Err(Error::Config(_))));

        let mut bad_default = engine_config(&[]);
        bad_default.default_threshold = Some(-3);
        assert!(matches!(DecisionConfig::try_from(bad_default), Err(Error::Config(_))));

        let mut bad_confidence = engine_config(&[]);
        bad_confidence.min_confidence = 1.5;
        assert!(matches!(DecisionConfig::try_from(bad_confidence), Err(Error::Config(_))));
    }

    #[test]
    fn test_conflicting_spellings_rejected() {
        let conflicting = engine_config(&[("Adiós", 10), ("adios", 12)]);
        assert!(matches!(DecisionConfig::try_from(conflicting), Err(Error::Config(_))));

        let agreeing = engine_config(&[("Adiós", 10), ("adios", 10)]);
        assert!(DecisionConfig::try_from(agreeing).is_ok());
    }

    #[test]
    fn test_parse_server_config() -> Result<()> {
        let raw = r#"{
            "model": { "source": "signs.onnx", "labels": ["Hola", "Adiós"] },
            "decision": {
                "thresholds": { "Hola": 17, "Adiós": 10 },
                "frame_limit": 50,
                "time_budget_ms": 1500,
                "tie_break": "name",
                "weighting": "confidence"
            }
        }"#;

        let config = ServerConfig::from_json(raw)?;
        assert_eq!(config.model.input_width, 640);
        assert_eq!(config.model.input_height, 480);

        let decision = DecisionConfig::try_from(config.decision)?;
        assert_eq!(decision.frame_limit, 50);
        assert_eq!(decision.time_budget, Some(Duration::from_millis(1500)));
        assert_eq!(decision.tie_break, TieBreak::Name);
        assert_eq!(decision.weighting, Weighting::Confidence);

        Ok(())
    }

    #[test]
    fn test_shipped_config_is_valid() -> Result<()> {
        let config = ServerConfig::from_path(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/config/greetings.json"
        ))?;
        let decision = DecisionConfig::try_from(config.decision)?;

        assert_eq!(decision.thresholds.len(), 5);
        assert_eq!(decision.frame_limit, 200);

        Ok(())
    }
}
