use anyhow::Result;
use serde_json::Value;

use crate::classify::StrategyTag;
use crate::classify::TaskRegistry;
use crate::classify::classify;
use crate::collection::AnalyzedSample;
use crate::collection::TaskBatch;
use crate::config::EngineConfig;
use crate::config::LoadedConfig;
use crate::config::load_config;
use crate::config::load_config_from;
use crate::record::RawRecord;
use crate::sample::CanonicalSample;
use crate::sample::assemble_tagged;

/// Owns the configuration and task registry and turns raw records into
/// canonical samples.
///
/// The engine holds no per-sample state, so one instance can be shared by
/// reference across worker threads.
#[derive(Debug, Clone)]
pub struct SampleEngine {
    config: EngineConfig,
    registry: TaskRegistry,
}

impl SampleEngine {
    /// Load configuration for `app_name` (embedded defaults, user file,
    /// environment) and build an engine from it.
    pub fn load(app_name: impl AsRef<str>) -> Result<Self> {
        let LoadedConfig { config, .. } = load_config(app_name)?;
        Ok(Self::from_config(config))
    }

    pub fn load_from(app_name: impl AsRef<str>, path: &str) -> Result<Self> {
        let LoadedConfig { config, .. } = load_config_from(app_name, path)?;
        Ok(Self::from_config(config))
    }

    /// Construct an engine from an existing [`EngineConfig`]. Useful for tests.
    pub fn from_config(config: EngineConfig) -> Self {
        let registry = TaskRegistry::from_rules(&config.tasks);
        Self { config, registry }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Parse `value` with this engine's field vocabulary.
    pub fn record(&self, value: Value) -> RawRecord {
        RawRecord::parse(value, &self.config.fields)
    }

    pub fn classify(&self, record: &RawRecord) -> StrategyTag {
        classify(record, &self.registry, &self.config.fields)
    }

    pub fn assemble(&self, record: &RawRecord) -> CanonicalSample {
        self.assemble_with_signal(record, None)
    }

    /// `signal` is an externally computed exact or fuzzy match result, used
    /// only when the answers cannot be compared by label.
    pub fn assemble_with_signal(&self, record: &RawRecord, signal: Option<bool>) -> CanonicalSample {
        assemble_tagged(record, &self.config, &self.registry, signal).1
    }

    pub fn assemble_value(&self, value: Value) -> CanonicalSample {
        self.assemble(&self.record(value))
    }

    /// One sample per record, in input order.
    pub fn assemble_batch(&self, records: &[RawRecord]) -> Vec<CanonicalSample> {
        records.iter().map(|record| self.assemble(record)).collect()
    }

    /// Assemble every record of `batch`, keeping the task, sequence number
    /// and chosen strategy alongside each sample.
    pub fn analyze(&self, batch: &TaskBatch) -> Vec<AnalyzedSample> {
        let analyzed: Vec<AnalyzedSample> = batch
            .records
            .iter()
            .map(|entry| {
                let (strategy, sample) =
                    assemble_tagged(&entry.record, &self.config, &self.registry, None);
                AnalyzedSample {
                    task: batch.task.clone(),
                    sequence: entry.sequence,
                    doc_id: entry.record.doc_id(),
                    strategy,
                    sample,
                }
            })
            .collect();

        tracing::debug!(
            task = %batch.task,
            samples = analyzed.len(),
            omitted = batch.omitted,
            "analyzed task batch"
        );
        analyzed
    }
}

impl Default for SampleEngine {
    fn default() -> Self {
        Self::from_config(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskRule;
    use serde_json::json;

    #[test]
    fn batch_preserves_input_order() {
        let engine = SampleEngine::default();
        let records: Vec<RawRecord> = ["x", "y", "z"]
            .iter()
            .map(|question| {
                engine.record(json!({
                    "doc": {"question": question, "choices": ["a", "b"]},
                    "target": 1
                }))
            })
            .collect();

        let samples = engine.assemble_batch(&records);
        let questions: Vec<_> = samples
            .iter()
            .map(|sample| sample.question.as_deref())
            .collect();
        assert_eq!(questions, vec![Some("x"), Some("y"), Some("z")]);
    }

    #[test]
    fn custom_rules_change_classification() {
        let mut config = EngineConfig::default();
        config.tasks = vec![TaskRule::new("yesno", StrategyTag::ArgumentPairs)];
        let engine = SampleEngine::from_config(config);

        let record = engine
            .record(json!({
                "doc": {"question": "Is it?", "choices": ["ignored", "also ignored"]},
                "arguments": [["q", "Yes"], ["q", "No"]],
                "target": 0
            }))
            .with_task("custom_yesno");

        assert_eq!(engine.classify(&record), StrategyTag::ArgumentPairs);
        let sample = engine.assemble(&record);
        assert_eq!(sample.correct.text.as_deref(), Some("Yes"));
    }

    #[test]
    fn assemble_value_matches_explicit_parse() {
        let engine = SampleEngine::default();
        let value = json!({"doc": {"question": "?", "choices": ["a", "b"]}, "target": "B"});
        assert_eq!(
            engine.assemble_value(value.clone()),
            engine.assemble(&RawRecord::from_value(value))
        );
    }
}
