//! Boundary parse of one untrusted evaluation record.
//!
//! [`RawRecord::parse`] never fails. Every field the later stages need is
//! read once, into a typed shape, so classification and resolution work on
//! closed enums instead of poking at arbitrary JSON.

use serde_json::Map;
use serde_json::Value;

use crate::config::FieldSettings;

/// Highest `choiceN` field probed on a document.
const MAX_NUMBERED_CHOICES: usize = 26;

/// The shapes a choice-bearing document field arrives in.
#[derive(Debug, Clone, PartialEq)]
pub enum ChoiceContainer {
    /// `{"text": [...], "label": [...]}`; labels may be absent.
    Labeled {
        texts: Vec<Value>,
        labels: Option<Vec<Value>>,
    },
    /// A plain list, including `options` and `endings` style fields.
    Sequence(Vec<Value>),
    /// A list serialized into a string, e.g. `"['a', 'b']"`.
    Encoded(String),
}

impl ChoiceContainer {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Self::Sequence(items.clone())),
            Value::String(text) => Some(Self::Encoded(text.clone())),
            Value::Object(map) => {
                let texts = map.get("text")?.as_array()?.clone();
                let labels = map.get("label").and_then(Value::as_array).cloned();
                Some(Self::Labeled { texts, labels })
            }
            _ => None,
        }
    }
}

/// One `[prompt, completion]` request argument. `completion` is `None` when
/// the source value is not text-like; the pair still occupies its position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentPair {
    pub prompt: Option<String>,
    pub completion: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    raw: Value,
    task: Option<String>,
    doc_id: Option<u64>,
    container: Option<ChoiceContainer>,
    numbered_choices: Vec<Value>,
    arguments: Vec<ArgumentPair>,
    target: Option<Value>,
    selection: Option<Value>,
    scores: Option<Vec<Option<f64>>>,
    response: Option<String>,
    raw_responses: Option<String>,
}

impl RawRecord {
    /// Parse with the default field vocabulary.
    pub fn from_value(raw: Value) -> Self {
        Self::parse(raw, &FieldSettings::default())
    }

    pub fn parse(raw: Value, fields: &FieldSettings) -> Self {
        let top = raw.as_object();
        let doc = document_of(&raw);

        let task = first_present(top, &fields.task_fields)
            .and_then(Value::as_str)
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());

        let doc_id = top.and_then(|map| map.get("doc_id")).and_then(Value::as_u64);

        let container = doc.and_then(|doc| {
            fields.choice_containers.iter().find_map(|name| {
                let value = doc.get(name)?;
                let parsed = ChoiceContainer::from_value(value);
                if parsed.is_none() && !value.is_null() {
                    tracing::debug!(field = %name, "ignoring choice field with unsupported shape");
                }
                parsed
            })
        });

        let numbered_choices = doc
            .map(|doc| {
                (1..=MAX_NUMBERED_CHOICES)
                    .filter_map(|index| doc.get(&format!("choice{index}")))
                    .filter(|value| is_meaningful(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let arguments = top
            .and_then(|map| map.get("arguments"))
            .map(parse_arguments)
            .unwrap_or_default();

        let target = top
            .and_then(|map| map.get("target"))
            .filter(|value| !value.is_null())
            .or_else(|| first_present(doc, &fields.reference_fields))
            .cloned();

        let selection = first_present(top, &fields.selection_fields).cloned();

        let scores = top.and_then(|map| {
            fields.score_fields.iter().find_map(|name| {
                let entries = map.get(name)?.as_array()?;
                let scores: Vec<Option<f64>> = entries.iter().map(score_of).collect();
                scores.iter().any(Option::is_some).then_some(scores)
            })
        });

        let response = top.and_then(|map| {
            fields
                .response_fields
                .iter()
                .find_map(|name| map.get(name).and_then(leading_text))
        });

        let raw_responses = first_present(top, &fields.response_fields).map(render_value);

        Self {
            raw,
            task,
            doc_id,
            container,
            numbered_choices,
            arguments,
            target,
            selection,
            scores,
            response,
            raw_responses,
        }
    }

    /// Set the declared task name, overriding any task field in the record.
    pub fn with_task(mut self, task: impl Into<String>) -> Self {
        let task = task.into();
        self.task = (!task.trim().is_empty()).then(|| task.trim().to_string());
        self
    }

    pub fn task(&self) -> Option<&str> {
        self.task.as_deref()
    }

    pub fn doc_id(&self) -> Option<u64> {
        self.doc_id
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The document fields: the `doc` object when present, otherwise the
    /// record itself.
    pub fn doc(&self) -> Option<&Map<String, Value>> {
        document_of(&self.raw)
    }

    pub fn has_doc_field(&self, name: &str) -> bool {
        self.doc().is_some_and(|doc| doc.contains_key(name))
    }

    /// Trimmed, non-empty text of a document field.
    pub fn doc_text(&self, name: &str) -> Option<String> {
        self.doc()?.get(name).and_then(scalar_text)
    }

    pub fn container(&self) -> Option<&ChoiceContainer> {
        self.container.as_ref()
    }

    /// Non-empty `choice1`, `choice2`, ... values in numeric order.
    pub fn numbered_choices(&self) -> &[Value] {
        &self.numbered_choices
    }

    pub fn arguments(&self) -> &[ArgumentPair] {
        &self.arguments
    }

    /// Number of argument pairs carrying a text-like completion.
    pub fn text_argument_count(&self) -> usize {
        self.arguments
            .iter()
            .filter(|pair| pair.completion.is_some())
            .count()
    }

    pub fn target(&self) -> Option<&Value> {
        self.target.as_ref()
    }

    pub fn selection(&self) -> Option<&Value> {
        self.selection.as_ref()
    }

    /// Per-position scores; `None` entries could not be read as numbers.
    pub fn scores(&self) -> Option<&[Option<f64>]> {
        self.scores.as_deref()
    }

    /// The first generated text found among the response fields.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// The response field rendered verbatim, for display when nothing could
    /// be resolved from it.
    pub fn raw_responses(&self) -> Option<&str> {
        self.raw_responses.as_deref()
    }
}

fn document_of(raw: &Value) -> Option<&Map<String, Value>> {
    match raw.get("doc") {
        Some(Value::Object(doc)) => Some(doc),
        _ => raw.as_object(),
    }
}

fn first_present<'a>(map: Option<&'a Map<String, Value>>, names: &[String]) -> Option<&'a Value> {
    let map = map?;
    names
        .iter()
        .filter_map(|name| map.get(name))
        .find(|value| !value.is_null())
}

fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        _ => true,
    }
}

fn parse_arguments(value: &Value) -> Vec<ArgumentPair> {
    match value {
        Value::Array(items) => items.iter().map(parse_pair).collect(),
        Value::Object(map) => {
            // `{"gen_args_0": {"arg_0": .., "arg_1": ..}, ...}`; keys sort by
            // their numeric suffix so `gen_args_10` follows `gen_args_9`.
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by_key(|(key, _)| (trailing_number(key), (*key).clone()));
            entries.into_iter().map(|(_, pair)| parse_pair(pair)).collect()
        }
        _ => Vec::new(),
    }
}

fn parse_pair(value: &Value) -> ArgumentPair {
    let (prompt, completion) = match value {
        Value::Array(parts) => (parts.first(), parts.get(1)),
        Value::Object(parts) => (parts.get("arg_0"), parts.get("arg_1")),
        _ => (None, None),
    };

    ArgumentPair {
        prompt: prompt.and_then(Value::as_str).map(str::to_string),
        completion: completion.and_then(completion_text),
    }
}

fn completion_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

fn trailing_number(key: &str) -> u64 {
    let digits: String = key
        .chars()
        .rev()
        .take_while(char::is_ascii_digit)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    digits.parse().unwrap_or(u64::MAX)
}

/// A score entry is a bare number or a list whose first element is the
/// score (harness output nests `[logprob, is_greedy]` pairs, sometimes with
/// the logprob as a string). Bare strings are generated text, not scores.
fn score_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|score| !score.is_nan()),
        Value::Array(items) => items.first().and_then(nested_score),
        _ => None,
    }
}

fn nested_score(value: &Value) -> Option<f64> {
    let score = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse::<f64>().ok(),
        Value::Array(items) => items.first().and_then(nested_score),
        _ => None,
    }?;
    (!score.is_nan()).then_some(score)
}

fn leading_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        Value::Array(items) => items.first().and_then(leading_text),
        _ => None,
    }
}

/// Text of a scalar value; `None` for empty strings, null and containers.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => {
            let trimmed = text.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        }
        Value::Number(number) => Some(number.to_string()),
        Value::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

/// Strings verbatim, everything else as compact JSON.
pub(crate) fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_harness_sample_layout() {
        let record = RawRecord::from_value(json!({
            "doc_id": 4,
            "task": "leaderboard_bbh_web_of_lies",
            "doc": {"input": "Question: Does Sal tell the truth?"},
            "target": "Yes",
            "arguments": [["Q", " Yes"], ["Q", " No"]],
            "resps": [[["-0.16", "True"]], [["-1.91", "False"]]],
            "filtered_resps": [["-0.16", "True"], ["-1.91", "False"]],
            "acc": 1.0
        }));

        assert_eq!(record.task(), Some("leaderboard_bbh_web_of_lies"));
        assert_eq!(record.doc_id(), Some(4));
        assert_eq!(record.target(), Some(&json!("Yes")));
        assert_eq!(record.scores(), Some(&[Some(-0.16), Some(-1.91)][..]));
        assert_eq!(record.text_argument_count(), 2);
        assert_eq!(record.arguments()[0].completion.as_deref(), Some("Yes"));
        assert_eq!(
            record.doc_text("input").as_deref(),
            Some("Question: Does Sal tell the truth?")
        );
    }

    #[test]
    fn flat_records_are_their_own_document() {
        let record = RawRecord::from_value(json!({
            "question": "2 + 2?",
            "choices": ["3", "4"],
            "answer": 1
        }));

        assert_eq!(record.doc_text("question").as_deref(), Some("2 + 2?"));
        assert!(matches!(
            record.container(),
            Some(ChoiceContainer::Sequence(items)) if items.len() == 2
        ));
        assert_eq!(record.target(), Some(&json!(1)));
    }

    #[test]
    fn recognizes_each_container_shape() {
        let labeled = RawRecord::from_value(json!({
            "doc": {"choices": {"text": ["x", "y"], "label": ["A", "B"]}}
        }));
        assert!(matches!(
            labeled.container(),
            Some(ChoiceContainer::Labeled { labels: Some(_), .. })
        ));

        let encoded = RawRecord::from_value(json!({"doc": {"choices": "['a', 'b']"}}));
        assert_eq!(
            encoded.container(),
            Some(&ChoiceContainer::Encoded("['a', 'b']".into()))
        );

        let endings = RawRecord::from_value(json!({"doc": {"endings": ["a", "b"]}}));
        assert!(matches!(endings.container(), Some(ChoiceContainer::Sequence(_))));

        let unsupported = RawRecord::from_value(json!({"doc": {"choices": 7}}));
        assert!(unsupported.container().is_none());
    }

    #[test]
    fn numbered_choice_fields_skip_blanks() {
        let record = RawRecord::from_value(json!({
            "doc": {"choice1": "a", "choice2": "", "choice3": "c", "choice10": "j"}
        }));
        assert_eq!(
            record.numbered_choices(),
            &[json!("a"), json!("c"), json!("j")]
        );
    }

    #[test]
    fn keyed_arguments_follow_numeric_order() {
        let mut arguments = serde_json::Map::new();
        for index in 0..11 {
            arguments.insert(
                format!("gen_args_{index}"),
                json!({"arg_0": "ctx", "arg_1": format!(" option {index}")}),
            );
        }
        let record = RawRecord::from_value(json!({"arguments": arguments}));

        let completions: Vec<_> = record
            .arguments()
            .iter()
            .filter_map(|pair| pair.completion.clone())
            .collect();
        assert_eq!(completions.len(), 11);
        assert_eq!(completions[2], "option 2");
        assert_eq!(completions[10], "option 10");
    }

    #[test]
    fn non_text_completions_keep_their_position() {
        let record = RawRecord::from_value(json!({
            "arguments": [["p", "Yes"], ["p", {"until": ["\n"]}], ["p", 3]]
        }));
        let completions: Vec<_> = record
            .arguments()
            .iter()
            .map(|pair| pair.completion.as_deref())
            .collect();
        assert_eq!(completions, vec![Some("Yes"), None, Some("3")]);
    }

    #[test]
    fn generated_text_is_not_mistaken_for_scores() {
        let record = RawRecord::from_value(json!({
            "doc": {"problem": "Simplify."},
            "filtered_resps": ["\\frac{1}{2}"],
            "resps": [["The answer is \\frac{1}{2}"]]
        }));
        assert!(record.scores().is_none());
        assert_eq!(record.response(), Some("\\frac{1}{2}"));
    }

    #[test]
    fn bare_strings_are_responses_not_scores() {
        let record = RawRecord::from_value(json!({
            "doc": {"question": "2+2?", "choices": ["3", "4", "5"]},
            "filtered_resps": ["1"]
        }));
        assert!(record.scores().is_none());
        assert_eq!(record.response(), Some("1"));

        let nested = RawRecord::from_value(json!({"resps": [[["-0.5", "False"]], [[-1.5, true]]]}));
        assert_eq!(nested.scores(), Some(&[Some(-0.5), Some(-1.5)][..]));
    }

    #[test]
    fn explicit_task_overrides_record_field() {
        let record = RawRecord::from_value(json!({"task": "a"})).with_task(" b ");
        assert_eq!(record.task(), Some("b"));
    }

    #[test]
    fn non_object_input_is_tolerated() {
        let record = RawRecord::from_value(json!("just text"));
        assert!(record.doc().is_none());
        assert!(record.container().is_none());
        assert!(record.target().is_none());
        assert_eq!(record.raw(), &json!("just text"));
    }
}
