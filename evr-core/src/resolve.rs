//! Answer resolution: which choice is correct, which one the model picked,
//! and the per-choice scores behind that pick.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::choices::ChoiceSet;
use crate::classify::StrategyTag;
use crate::config::FallbackSettings;
use crate::error::ExtractError;
use crate::record::RawRecord;
use crate::record::render_value;
use crate::record::scalar_text;

/// A correct or selected answer. `label == None` means unresolved; `text`
/// may then still carry the raw value that could not be matched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolvedAnswer {
    pub label: Option<String>,
    pub text: Option<String>,
    pub confidence: Option<f64>,
}

impl ResolvedAnswer {
    pub fn unresolved() -> Self {
        Self::default()
    }

    /// Unresolved, but keeping what arrived for display.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.label.is_some()
    }

    fn choice(choices: &ChoiceSet, index: usize, scores: Option<&[Option<f64>]>) -> Self {
        let choice = choices.get(index);
        Self {
            label: choice.map(|c| c.label.clone()),
            text: choice.map(|c| c.text.clone()),
            confidence: score_for(choices, index, scores),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Confidence {
    pub label: String,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub correct: ResolvedAnswer,
    pub model_answer: ResolvedAnswer,
    pub confidences: Vec<Confidence>,
}

/// Resolve both answers for `record` against its extracted `choices`.
///
/// With an empty choice set the answers carry text only: the reference
/// answer and the generated response.
pub fn resolve(
    record: &RawRecord,
    choices: &ChoiceSet,
    tag: StrategyTag,
    fallback: &FallbackSettings,
) -> Resolution {
    if choices.is_empty() {
        return Resolution {
            correct: ResolvedAnswer {
                text: record.target().and_then(reference_text),
                ..ResolvedAnswer::default()
            },
            model_answer: ResolvedAnswer {
                text: record.response().map(str::to_string),
                ..ResolvedAnswer::default()
            },
            confidences: Vec::new(),
        };
    }

    let scores = parallel_scores(record, choices);
    let correct = resolve_correct(record, choices, scores, tag, fallback);
    let model_answer = resolve_selected(record, choices, scores, tag, fallback);

    let confidences = match scores {
        Some(scores) => choices
            .iter()
            .enumerate()
            .map(|(index, choice)| Confidence {
                label: choice.label.clone(),
                score: score_for(choices, index, Some(scores)),
            })
            .collect(),
        None => Vec::new(),
    };

    Resolution {
        correct,
        model_answer,
        confidences,
    }
}

/// `Some` only when it can be known: label equality for two resolved
/// answers, otherwise whatever external signal was supplied.
pub fn judge(correct: &ResolvedAnswer, model: &ResolvedAnswer, signal: Option<bool>) -> Option<bool> {
    match (&correct.label, &model.label) {
        (Some(expected), Some(selected)) => Some(expected == selected),
        _ => signal,
    }
}

/// Map a raw target or selection to a choice index.
///
/// Tried in order: a label the record itself provided, an integer (or
/// integral float, or digit string) source position, a single letter with
/// or without parentheses, and finally the exact text of a choice.
pub fn coerce_choice(value: &Value, choices: &ChoiceSet) -> Result<usize, ExtractError> {
    match value {
        Value::Number(number) => {
            let index = number
                .as_i64()
                .or_else(|| {
                    number
                        .as_f64()
                        .filter(|n| n.fract() == 0.0 && n.abs() < i64::MAX as f64)
                        .map(|n| n as i64)
                })
                .ok_or_else(|| ExtractError::coercion(number))?;
            index_at(index, choices)
        }
        Value::String(text) => coerce_text(text, choices),
        other => Err(ExtractError::coercion(other)),
    }
}

fn coerce_text(text: &str, choices: &ChoiceSet) -> Result<usize, ExtractError> {
    let trimmed = text.trim();

    if choices.has_provided_labels()
        && let Some(index) = choices.index_of_label(trimmed)
    {
        return Ok(index);
    }

    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        let index = trimmed
            .parse::<i64>()
            .map_err(|_| ExtractError::coercion(trimmed))?;
        return index_at(index, choices);
    }

    let letter = trimmed
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(trimmed);
    let mut chars = letter.chars();
    if let (Some(ch), None) = (chars.next(), chars.next())
        && ch.is_ascii_alphabetic()
    {
        let index = (ch.to_ascii_uppercase() as u8 - b'A') as usize;
        return if index < choices.len() {
            Ok(index)
        } else {
            Err(ExtractError::OutOfRange {
                index: index as i64,
                len: choices.len(),
            })
        };
    }

    choices
        .index_of_text(trimmed)
        .ok_or_else(|| ExtractError::coercion(format!("{text:?}")))
}

/// Integer values count source positions, so argument pairs with skipped
/// completions still line up.
fn index_at(position: i64, choices: &ChoiceSet) -> Result<usize, ExtractError> {
    usize::try_from(position)
        .ok()
        .and_then(|position| choices.index_at_position(position))
        .ok_or(ExtractError::OutOfRange {
            index: position,
            len: choices.len(),
        })
}

fn resolve_correct(
    record: &RawRecord,
    choices: &ChoiceSet,
    scores: Option<&[Option<f64>]>,
    tag: StrategyTag,
    fallback: &FallbackSettings,
) -> ResolvedAnswer {
    let Some(target) = record.target() else {
        tracing::debug!(task = record.task(), error = %ExtractError::missing("target"), "correct answer unresolved");
        return ResolvedAnswer::unresolved();
    };

    match coerce_choice(target, choices) {
        Ok(index) => ResolvedAnswer::choice(choices, index, scores),
        Err(error) => {
            tracing::debug!(task = record.task(), strategy = %tag, %error, "correct answer unresolved");
            ResolvedAnswer::raw(fallback.truncate(&render_value(target)))
        }
    }
}

fn resolve_selected(
    record: &RawRecord,
    choices: &ChoiceSet,
    scores: Option<&[Option<f64>]>,
    tag: StrategyTag,
    fallback: &FallbackSettings,
) -> ResolvedAnswer {
    let best = scores.and_then(|scores| best_scoring(choices, scores));

    if let Some(selection) = record.selection() {
        match coerce_choice(selection, choices) {
            Ok(index) => {
                if let Some(best) = best
                    && best != index
                {
                    tracing::debug!(
                        task = record.task(),
                        selected = index,
                        best_scoring = best,
                        "explicit selection disagrees with highest score, keeping selection"
                    );
                }
                return ResolvedAnswer::choice(choices, index, scores);
            }
            Err(error) => {
                tracing::debug!(task = record.task(), strategy = %tag, %error, "explicit selection unusable");
            }
        }
    }

    if let Some(index) = best {
        return ResolvedAnswer::choice(choices, index, scores);
    }

    // Generated answers to multiple-choice prompts, e.g. "(B)".
    if let Some(response) = record.response()
        && let Ok(index) = coerce_text(response, choices)
    {
        return ResolvedAnswer::choice(choices, index, scores);
    }

    let raw = record
        .selection()
        .map(render_value)
        .or_else(|| record.raw_responses().map(str::to_string));
    match raw {
        Some(raw) => ResolvedAnswer::raw(fallback.truncate(&raw)),
        None => ResolvedAnswer::unresolved(),
    }
}

/// The record's scores, when they line up with every choice's source
/// position. A shorter list belongs to some other shape of output.
fn parallel_scores<'a>(record: &'a RawRecord, choices: &ChoiceSet) -> Option<&'a [Option<f64>]> {
    let scores = record.scores()?;
    let covered = (0..choices.len())
        .filter_map(|index| choices.source_position(index))
        .all(|position| position < scores.len());
    if !covered {
        tracing::debug!(
            task = record.task(),
            scores = scores.len(),
            choices = choices.len(),
            "score list does not cover every choice, ignoring it"
        );
        return None;
    }
    Some(scores)
}

/// Index of the highest-scoring choice; ties go to the earliest.
fn best_scoring(choices: &ChoiceSet, scores: &[Option<f64>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for index in 0..choices.len() {
        let Some(score) = score_for(choices, index, Some(scores)) else {
            continue;
        };
        if best.is_none_or(|(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index)
}

fn score_for(choices: &ChoiceSet, index: usize, scores: Option<&[Option<f64>]>) -> Option<f64> {
    let position = choices.source_position(index)?;
    scores?.get(position).copied().flatten()
}

fn reference_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
        other => scalar_text(other),
    }
}
