//! Choice extraction: turns whatever container a record uses into an ordered,
//! uniquely labeled [`ChoiceSet`].

use std::collections::HashSet;

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

use crate::classify::StrategyTag;
use crate::config::FieldSettings;
use crate::error::ExtractError;
use crate::literal;
use crate::patterns;
use crate::record::ChoiceContainer;
use crate::record::RawRecord;
use crate::record::render_value;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    pub label: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelScheme {
    /// `A`..`Z`, then `AA`, `AB`, ...
    Letters,
    /// `1`, `2`, ...
    Numbers,
}

impl LabelScheme {
    pub fn for_strategy(tag: StrategyTag) -> Self {
        match tag {
            StrategyTag::Narrative => LabelScheme::Numbers,
            _ => LabelScheme::Letters,
        }
    }

    pub fn label(&self, index: usize) -> String {
        match self {
            LabelScheme::Numbers => (index + 1).to_string(),
            LabelScheme::Letters => {
                let mut remaining = index + 1;
                let mut letters = Vec::new();
                while remaining > 0 {
                    remaining -= 1;
                    letters.push(char::from(b'A' + (remaining % 26) as u8));
                    remaining /= 26;
                }
                letters.iter().rev().collect()
            }
        }
    }
}

/// Ordered choices with unique labels.
///
/// Serializes as the plain list of choices. Each entry also remembers its
/// position in the source container so per-position scores stay aligned when
/// some source entries were skipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChoiceSet {
    entries: Vec<Choice>,
    #[serde(skip)]
    positions: Vec<usize>,
    #[serde(skip)]
    provided_labels: bool,
}

impl ChoiceSet {
    pub fn from_texts(texts: Vec<String>, scheme: LabelScheme) -> Self {
        Self::from_positioned(texts.into_iter().enumerate().collect(), scheme)
    }

    /// Labels follow the order of `items`; the positions are kept as given.
    pub fn from_positioned(items: Vec<(usize, String)>, scheme: LabelScheme) -> Self {
        let (positions, entries) = items
            .into_iter()
            .enumerate()
            .map(|(index, (position, text))| {
                let label = scheme.label(index);
                (position, Choice { label, text })
            })
            .unzip();
        Self {
            entries,
            positions,
            provided_labels: false,
        }
    }

    /// Use the provided labels when they are usable, otherwise synthesize
    /// them with `fallback`.
    pub fn from_labeled(texts: Vec<String>, labels: &[Value], fallback: LabelScheme) -> Self {
        let Some(labels) = usable_labels(labels, texts.len()) else {
            tracing::debug!(
                labels = labels.len(),
                texts = texts.len(),
                "provided labels unusable, synthesizing"
            );
            return Self::from_texts(texts, fallback);
        };

        let positions = (0..texts.len()).collect();
        let entries = labels
            .into_iter()
            .zip(texts)
            .map(|(label, text)| Choice { label, text })
            .collect();
        Self {
            entries,
            positions,
            provided_labels: true,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Choice> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Choice> {
        self.entries.get(index)
    }

    pub fn labels(&self) -> Vec<&str> {
        self.entries.iter().map(|choice| choice.label.as_str()).collect()
    }

    /// Source position of the choice at `index`.
    pub fn source_position(&self, index: usize) -> Option<usize> {
        self.positions.get(index).copied()
    }

    /// Index of the choice sitting at source `position`.
    pub fn index_at_position(&self, position: usize) -> Option<usize> {
        self.positions.iter().position(|p| *p == position)
    }

    /// Whether the labels came from the record rather than a [`LabelScheme`].
    pub fn has_provided_labels(&self) -> bool {
        self.provided_labels
    }

    pub fn index_of_label(&self, label: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|choice| choice.label.eq_ignore_ascii_case(label))
    }

    pub fn index_of_text(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        self.entries
            .iter()
            .position(|choice| choice.text.trim() == text)
    }
}

impl<'a> IntoIterator for &'a ChoiceSet {
    type Item = &'a Choice;
    type IntoIter = std::slice::Iter<'a, Choice>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Build the choice set for `record` using the strategy picked by the
/// classifier. Extraction failures yield an empty set.
pub fn extract_choices(record: &RawRecord, tag: StrategyTag, fields: &FieldSettings) -> ChoiceSet {
    let scheme = LabelScheme::for_strategy(tag);
    let extracted = match tag {
        StrategyTag::Narrative | StrategyTag::ChoiceList => record
            .container()
            .ok_or_else(|| ExtractError::missing(fields.choice_containers.join("|")))
            .and_then(|container| from_container(container, scheme)),
        StrategyTag::ChoiceFields => {
            let texts: Vec<String> = record.numbered_choices().iter().map(render_value).collect();
            if texts.is_empty() {
                Err(ExtractError::missing("choice1"))
            } else {
                Ok(ChoiceSet::from_texts(texts, scheme))
            }
        }
        StrategyTag::EmbeddedPattern => from_embedded(record, fields, scheme),
        StrategyTag::ArgumentPairs => {
            let items: Vec<(usize, String)> = record
                .arguments()
                .iter()
                .enumerate()
                .filter_map(|(position, pair)| Some((position, pair.completion.clone()?)))
                .collect();
            if items.is_empty() {
                Err(ExtractError::missing("arguments"))
            } else {
                Ok(ChoiceSet::from_positioned(items, scheme))
            }
        }
        StrategyTag::FreeForm => Ok(ChoiceSet::default()),
    };

    match extracted {
        Ok(set) => set,
        Err(error) => {
            tracing::debug!(
                task = record.task(),
                strategy = %tag,
                %error,
                "choice extraction failed, continuing without choices"
            );
            ChoiceSet::default()
        }
    }
}

fn from_embedded(
    record: &RawRecord,
    fields: &FieldSettings,
    scheme: LabelScheme,
) -> Result<ChoiceSet, ExtractError> {
    fields
        .question_fields
        .iter()
        .filter_map(|name| record.doc_text(name))
        .map(|text| patterns::embedded_choices(&text))
        .find(|texts| !texts.is_empty())
        .map(|texts| ChoiceSet::from_texts(texts, scheme))
        .ok_or_else(|| ExtractError::missing("option markers"))
}

fn from_container(container: &ChoiceContainer, scheme: LabelScheme) -> Result<ChoiceSet, ExtractError> {
    match container {
        ChoiceContainer::Sequence(items) => Ok(ChoiceSet::from_texts(
            items.iter().map(render_value).collect(),
            scheme,
        )),
        ChoiceContainer::Encoded(encoded) => {
            let items = literal::parse_list(encoded)?;
            Ok(ChoiceSet::from_texts(
                items.iter().map(literal::Literal::render).collect(),
                scheme,
            ))
        }
        ChoiceContainer::Labeled { texts, labels } => {
            let texts = texts.iter().map(render_value).collect();
            Ok(match labels {
                Some(labels) => ChoiceSet::from_labeled(texts, labels, scheme),
                None => ChoiceSet::from_texts(texts, scheme),
            })
        }
    }
}

fn usable_labels(labels: &[Value], expected: usize) -> Option<Vec<String>> {
    if labels.len() != expected {
        return None;
    }

    let mut seen = HashSet::with_capacity(labels.len());
    labels
        .iter()
        .map(|value| {
            let label = match value {
                Value::String(text) => text.trim().to_string(),
                Value::Number(number) => number.to_string(),
                _ => return None,
            };
            (!label.is_empty() && seen.insert(label.to_ascii_uppercase())).then_some(label)
        })
        .collect()
}
