//! The sample assembler: classify, extract, resolve, then apply fallbacks.

use serde::Deserialize;
use serde::Serialize;

use crate::choices::ChoiceSet;
use crate::choices::extract_choices;
use crate::classify::StrategyTag;
use crate::classify::TaskRegistry;
use crate::classify::classify;
use crate::config::EngineConfig;
use crate::config::FieldSettings;
use crate::record::RawRecord;
use crate::record::render_value;
use crate::resolve::Confidence;
use crate::resolve::ResolvedAnswer;
use crate::resolve::judge;
use crate::resolve::resolve;

/// Uniform, render-ready view of one evaluated sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalSample {
    pub narrative: Option<String>,
    pub question: Option<String>,
    pub choices: ChoiceSet,
    pub correct: ResolvedAnswer,
    pub model_answer: ResolvedAnswer,
    pub confidences: Vec<Confidence>,
    pub is_correct: Option<bool>,
    pub raw_fallback: Option<String>,
}

/// Build the canonical sample for `record`. Never fails.
pub fn assemble(record: &RawRecord, config: &EngineConfig, registry: &TaskRegistry) -> CanonicalSample {
    assemble_tagged(record, config, registry, None).1
}

/// Like [`assemble`], with an externally computed match signal used when the
/// answers cannot be compared by label.
pub fn assemble_with_signal(
    record: &RawRecord,
    config: &EngineConfig,
    registry: &TaskRegistry,
    signal: Option<bool>,
) -> CanonicalSample {
    assemble_tagged(record, config, registry, signal).1
}

pub(crate) fn assemble_tagged(
    record: &RawRecord,
    config: &EngineConfig,
    registry: &TaskRegistry,
    signal: Option<bool>,
) -> (StrategyTag, CanonicalSample) {
    let fields = &config.fields;
    let tag = classify(record, registry, fields);
    let choices = extract_choices(record, tag, fields);
    let resolution = resolve(record, &choices, tag, &config.fallback);

    let free_form = choices.is_empty();
    let is_correct = judge(&resolution.correct, &resolution.model_answer, signal);

    let narrative = record.doc_text("narrative");
    let question = question_text(record, tag, fields);

    let raw_fallback = (free_form
        && (question.is_none()
            || (resolution.correct.text.is_none() && resolution.model_answer.text.is_none())))
    .then(|| {
        let raw = best_raw_text(record, fields, question.is_some());
        tracing::debug!(task = record.task(), strategy = %tag, "no usable answer fields, using raw fallback");
        config.fallback.truncate(&raw)
    });

    let sample = CanonicalSample {
        narrative,
        question,
        choices,
        correct: resolution.correct,
        model_answer: resolution.model_answer,
        confidences: resolution.confidences,
        is_correct,
        raw_fallback,
    };
    (tag, sample)
}

fn question_text(record: &RawRecord, tag: StrategyTag, fields: &FieldSettings) -> Option<String> {
    let preferred = match tag {
        StrategyTag::Narrative => record.doc_text("question"),
        StrategyTag::ChoiceFields => record.doc_text("Question"),
        _ => None,
    };

    preferred
        .or_else(|| {
            fields
                .question_fields
                .iter()
                .find_map(|name| record.doc_text(name))
        })
        .or_else(|| {
            // HellaSwag splits its context in two.
            let head = record.doc_text("ctx_a")?;
            Some(match record.doc_text("ctx_b") {
                Some(tail) => format!("{head} {tail}"),
                None => head,
            })
        })
}

/// Most informative raw text for display. With a question already shown,
/// question fields are skipped so the fallback adds something new.
fn best_raw_text(record: &RawRecord, fields: &FieldSettings, has_question: bool) -> String {
    let is_question_field = |name: &str| fields.question_fields.iter().any(|field| field == name);

    let from_question = if has_question {
        None
    } else {
        fields
            .question_fields
            .iter()
            .find_map(|name| record.doc_text(name))
    };

    let from_doc = from_question.or_else(|| {
        record.doc()?.iter().find_map(|(name, value)| {
            if has_question && is_question_field(name) {
                return None;
            }
            value
                .as_str()
                .map(str::trim)
                .filter(|text| !text.is_empty())
                .map(str::to_string)
        })
    });

    from_doc
        .or_else(|| record.raw_responses().map(str::to_string))
        .unwrap_or_else(|| render_value(record.raw()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use serde_json::json;

    fn run(value: Value) -> CanonicalSample {
        let config = EngineConfig::default();
        let registry = TaskRegistry::from_rules(&config.tasks);
        assemble(&RawRecord::from_value(value), &config, &registry)
    }

    #[test]
    fn narrative_sample_keeps_story_and_question() {
        let sample = run(json!({
            "task": "leaderboard_musr_object_placements",
            "doc": {
                "narrative": "Ana left the score on the piano.",
                "question": "Where will Ben look for the score?",
                "choices": "['piano', \"producer's desk\", 'recording booth']",
                "answer_index": 0
            },
            "target": 0,
            "filtered_resps": [["-0.2", "False"], ["-1.5", "False"], ["-3.0", "False"]]
        }));

        assert_eq!(sample.narrative.as_deref(), Some("Ana left the score on the piano."));
        assert_eq!(sample.question.as_deref(), Some("Where will Ben look for the score?"));
        assert_eq!(sample.choices.labels(), vec!["1", "2", "3"]);
        assert_eq!(sample.correct.label.as_deref(), Some("1"));
        assert_eq!(sample.model_answer.label.as_deref(), Some("1"));
        assert_eq!(sample.is_correct, Some(true));
        assert!(sample.raw_fallback.is_none());
    }

    #[test]
    fn hellaswag_context_halves_are_joined() {
        let sample = run(json!({
            "task": "hellaswag",
            "doc": {"ctx_a": "A man sits.", "ctx_b": "He", "endings": ["stands", "eats"]},
            "target": "0"
        }));
        assert_eq!(sample.question.as_deref(), Some("A man sits. He"));
        assert_eq!(sample.correct.text.as_deref(), Some("stands"));
    }

    #[test]
    fn free_form_ignores_harness_metrics() {
        let sample = run(json!({
            "task": "leaderboard_math_algebra_hard",
            "doc": {"problem": "Solve x + 1 = 2.", "solution": "x = 1"},
            "target": "1",
            "filtered_resps": ["1"],
            "exact_match": 1
        }));

        assert!(sample.choices.is_empty());
        assert_eq!(sample.correct.label, None);
        assert_eq!(sample.correct.text.as_deref(), Some("1"));
        assert_eq!(sample.model_answer.text.as_deref(), Some("1"));
        assert_eq!(sample.is_correct, None);
        assert!(sample.raw_fallback.is_none());

        let sample = run(json!({
            "doc": {"prompt": "Write a haiku."},
            "resps": [["Leaves fall"]],
            "prompt_level_strict_acc": true
        }));
        assert_eq!(sample.correct.text, None);
        assert_eq!(sample.is_correct, None);
    }

    #[test]
    fn harness_metrics_are_ignored_for_choice_tasks() {
        let sample = run(json!({
            "doc": {"question": "?", "choices": ["a", "b"]},
            "target": "N/A",
            "scores": [-1.0, -2.0],
            "acc": 1.0
        }));
        assert_eq!(sample.is_correct, None);
    }

    #[test]
    fn fallback_does_not_repeat_the_question() {
        let sample = run(json!({
            "doc": {"question": "Describe the image.", "image_id": "img-42"}
        }));
        assert_eq!(sample.question.as_deref(), Some("Describe the image."));
        assert_eq!(sample.raw_fallback.as_deref(), Some("img-42"));

        let sample = run(json!({"doc": {"question": "Describe the image.", "id": 7}}));
        let fallback = sample.raw_fallback.unwrap_or_default();
        assert!(fallback.starts_with("{\"doc\":"), "{fallback}");
        assert!(fallback.contains("\"id\":7"), "{fallback}");
    }

    #[test]
    fn caller_signal_fills_in_for_free_form() {
        let config = EngineConfig::default();
        let registry = TaskRegistry::from_rules(&config.tasks);
        let record = RawRecord::from_value(json!({
            "doc": {"prompt": "Write a haiku."},
            "resps": [["Leaves fall..."]]
        }));

        assert_eq!(assemble(&record, &config, &registry).is_correct, None);
        assert_eq!(
            assemble_with_signal(&record, &config, &registry, Some(false)).is_correct,
            Some(false)
        );
    }

    #[test]
    fn unknown_shapes_fall_back_to_raw_text() {
        let sample = run(json!({"weird": {"nested": [1, 2]}, "note": "  see logs  "}));
        assert!(sample.question.is_none());
        assert!(sample.choices.is_empty());
        assert_eq!(sample.raw_fallback.as_deref(), Some("see logs"));

        let sample = run(json!(42));
        assert_eq!(sample.raw_fallback.as_deref(), Some("42"));
    }

    #[test]
    fn long_fallbacks_are_truncated() {
        let sample = run(json!({"blob": "x".repeat(500)}));
        let fallback = sample.raw_fallback.unwrap_or_default();
        assert_eq!(fallback.chars().count(), 203);
        assert!(fallback.ends_with("..."));
    }

    #[test]
    fn serializes_with_stable_field_names() {
        let sample = run(json!({"doc": {"question": "?", "choices": ["a"]}, "target": 0}));
        let value = serde_json::to_value(&sample).unwrap();
        let keys: Vec<&str> = value
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        for key in [
            "narrative",
            "question",
            "choices",
            "correct",
            "model_answer",
            "confidences",
            "is_correct",
            "raw_fallback",
        ] {
            assert!(keys.contains(&key), "missing {key}");
        }
        assert_eq!(value["choices"], json!([{"label": "A", "text": "a"}]));
        assert_eq!(value["correct"], json!({"label": "A", "text": "a", "confidence": null}));
    }
}
