//! Splitting persisted evaluation results into per-task record batches.

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::classify::StrategyTag;
use crate::config::FieldSettings;
use crate::record::RawRecord;
use crate::sample::CanonicalSample;

/// A record together with its position in the task's original sample list.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencedRecord {
    pub sequence: usize,
    pub record: RawRecord,
}

/// The records of one task, in their original order.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskBatch {
    pub task: String,
    pub records: Vec<SequencedRecord>,
    /// Records dropped by the per-task cap.
    pub omitted: usize,
}

/// A canonical sample plus what a report needs to group and re-sort it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzedSample {
    pub task: String,
    pub sequence: usize,
    pub doc_id: Option<u64>,
    pub strategy: StrategyTag,
    pub sample: CanonicalSample,
}

impl TaskBatch {
    /// Build a batch from already parsed values, keeping at most
    /// `max_per_task` of them.
    pub fn from_values(
        task: impl Into<String>,
        values: Vec<Value>,
        fields: &FieldSettings,
        max_per_task: Option<usize>,
    ) -> Self {
        let task = task.into();
        let total = values.len();
        let keep = max_per_task.map_or(total, |limit| limit.min(total));

        let records = values
            .into_iter()
            .take(keep)
            .enumerate()
            .map(|(sequence, value)| SequencedRecord {
                sequence,
                record: RawRecord::parse(value, fields).with_task(task.as_str()),
            })
            .collect();

        Self {
            task,
            records,
            omitted: total - keep,
        }
    }

    /// Split a results document of the form
    /// `{"samples": {"<task>": [record, ...], ...}}` into one batch per task,
    /// ordered by task name.
    pub fn from_results(
        results: &Value,
        fields: &FieldSettings,
        max_per_task: Option<usize>,
    ) -> Result<Vec<TaskBatch>> {
        let samples = results
            .get("samples")
            .ok_or_else(|| anyhow!("results document has no 'samples' section"))?
            .as_object()
            .ok_or_else(|| anyhow!("'samples' must map task names to record lists"))?;

        let mut tasks: Vec<(&String, &Value)> = samples.iter().collect();
        tasks.sort_by(|a, b| a.0.cmp(b.0));

        let mut batches = Vec::with_capacity(tasks.len());
        for (task, records) in tasks {
            let records = records
                .as_array()
                .with_context(|| format!("samples for task '{task}' are not a list"))?;
            batches.push(Self::from_values(
                task.as_str(),
                records.clone(),
                fields,
                max_per_task,
            ));
        }

        Ok(batches)
    }

    /// Parse a per-task JSONL sample log (one record per line, blank lines
    /// skipped).
    pub fn from_jsonl(
        task: impl Into<String>,
        text: &str,
        fields: &FieldSettings,
        max_per_task: Option<usize>,
    ) -> Result<Self> {
        let task = task.into();
        let mut values = Vec::new();

        for (line_num, line) in text.lines().enumerate() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(trimmed).with_context(|| {
                format!(
                    "failed to parse JSON at line {} of the '{task}' samples",
                    line_num + 1
                )
            })?;
            values.push(value);
        }

        Ok(Self::from_values(task, values, fields, max_per_task))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
