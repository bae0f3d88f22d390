//! Picks the extraction strategy for a record.

use indexmap::IndexMap;
use serde::Deserialize;
use serde::Serialize;

use crate::config::FieldSettings;
use crate::config::TaskRule;
use crate::error::ExtractError;
use crate::patterns;
use crate::record::RawRecord;

/// Closed set of extraction strategies, one per record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyTag {
    /// Long story, a `question`, and a choice list (MuSR-like).
    Narrative,
    /// `Question` plus `choice1..N` fields (GPQA-like).
    ChoiceFields,
    /// A container field: list, labeled dict or encoded string.
    ChoiceList,
    /// Markers such as `(A)` inside the question text.
    EmbeddedPattern,
    /// Choices are the completions of the request arguments.
    ArgumentPairs,
    /// No choices; the answer is generated text.
    FreeForm,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Narrative => "narrative",
            StrategyTag::ChoiceFields => "choice_fields",
            StrategyTag::ChoiceList => "choice_list",
            StrategyTag::EmbeddedPattern => "embedded_pattern",
            StrategyTag::ArgumentPairs => "argument_pairs",
            StrategyTag::FreeForm => "free_form",
        }
    }
}

impl std::fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered task-name patterns. Lookup is a case-insensitive substring match
/// and the first pattern that matches wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRegistry {
    rules: IndexMap<String, StrategyTag>,
}

impl TaskRegistry {
    pub fn from_rules(rules: &[TaskRule]) -> Self {
        let mut map = IndexMap::with_capacity(rules.len());
        for rule in rules {
            let pattern = rule.pattern.trim().to_lowercase();
            if pattern.is_empty() {
                continue;
            }
            // A repeated pattern keeps its first position and strategy.
            map.entry(pattern).or_insert(rule.strategy);
        }
        Self { rules: map }
    }

    pub fn lookup(&self, task: &str) -> Option<StrategyTag> {
        let task = task.to_lowercase();
        self.rules
            .iter()
            .find(|(pattern, _)| task.contains(pattern.as_str()))
            .map(|(_, strategy)| *strategy)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Decide how `record` carries its choices.
///
/// A declared task name matching a registry rule takes precedence. Without
/// one, the record's shape decides: a `narrative` field, `choiceN` fields, a
/// choice container, markers inside the question text, then at least two
/// text-like argument completions. Anything else is free-form.
pub fn classify(record: &RawRecord, registry: &TaskRegistry, fields: &FieldSettings) -> StrategyTag {
    if let Some(task) = record.task()
        && let Some(declared) = registry.lookup(task)
    {
        let strategy = refine_declared(declared, record, fields);
        tracing::trace!(task, %declared, %strategy, "classified by task name");
        return strategy;
    }

    let strategy = classify_by_shape(record, fields);
    tracing::trace!(task = record.task(), %strategy, "classified by record shape");
    strategy
}

/// A declared embedded-pattern task whose text carries no markers falls back
/// to its argument completions when there are enough of them.
fn refine_declared(declared: StrategyTag, record: &RawRecord, fields: &FieldSettings) -> StrategyTag {
    if declared == StrategyTag::EmbeddedPattern
        && !has_marked_text(record, fields)
        && record.text_argument_count() >= 2
    {
        return StrategyTag::ArgumentPairs;
    }
    declared
}

fn classify_by_shape(record: &RawRecord, fields: &FieldSettings) -> StrategyTag {
    if record.has_doc_field("narrative") {
        return StrategyTag::Narrative;
    }
    if record.has_doc_field("Question") && !record.numbered_choices().is_empty() {
        return StrategyTag::ChoiceFields;
    }
    if record.container().is_some() {
        return StrategyTag::ChoiceList;
    }
    if has_marked_text(record, fields) {
        return StrategyTag::EmbeddedPattern;
    }
    if record.text_argument_count() >= 2 {
        return StrategyTag::ArgumentPairs;
    }
    tracing::debug!(
        task = record.task(),
        error = %ExtractError::Unclassifiable,
        "treating record as free-form"
    );
    StrategyTag::FreeForm
}

fn has_marked_text(record: &RawRecord, fields: &FieldSettings) -> bool {
    fields
        .question_fields
        .iter()
        .filter_map(|name| record.doc_text(name))
        .any(|text| patterns::has_embedded_choices(&text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use serde_json::json;

    fn default_registry() -> TaskRegistry {
        TaskRegistry::from_rules(&EngineConfig::default().tasks)
    }

    fn tag(value: serde_json::Value) -> StrategyTag {
        let record = RawRecord::from_value(value);
        classify(&record, &default_registry(), &FieldSettings::default())
    }

    #[test]
    fn registry_matches_substrings_in_rule_order() {
        let registry = default_registry();
        assert_eq!(
            registry.lookup("leaderboard_MUSR_murder_mysteries"),
            Some(StrategyTag::Narrative)
        );
        assert_eq!(
            registry.lookup("mmlu_high_school_mathematics"),
            Some(StrategyTag::ChoiceList)
        );
        assert_eq!(
            registry.lookup("leaderboard_math_algebra_hard"),
            Some(StrategyTag::FreeForm)
        );
        assert_eq!(registry.lookup("winogrande"), None);
    }

    #[test]
    fn arc_rule_needs_the_suite_prefix() {
        let registry = default_registry();
        assert_eq!(registry.lookup("arc_challenge"), Some(StrategyTag::ChoiceList));
        assert_eq!(registry.lookup("leaderboard_arc_easy"), Some(StrategyTag::ChoiceList));
        assert_eq!(registry.lookup("hierarchical_planning"), None);
        assert_eq!(registry.lookup("web_research_qa"), None);
    }

    #[test]
    fn duplicate_patterns_keep_the_first_rule() {
        let registry = TaskRegistry::from_rules(&[
            TaskRule::new("suite", StrategyTag::ChoiceList),
            TaskRule::new("SUITE", StrategyTag::FreeForm),
            TaskRule::new("  ", StrategyTag::FreeForm),
        ]);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("my_suite"), Some(StrategyTag::ChoiceList));
    }

    #[test]
    fn declared_task_wins_over_shape() {
        assert_eq!(
            tag(json!({"task": "gpqa_main", "doc": {"choices": ["a", "b"]}})),
            StrategyTag::ChoiceFields
        );
    }

    #[test]
    fn declared_embedded_task_without_markers_uses_arguments() {
        assert_eq!(
            tag(json!({
                "task": "leaderboard_bbh_web_of_lies",
                "doc": {"input": "Question: Does Sal tell the truth?"},
                "arguments": [["q", " Yes"], ["q", " No"]]
            })),
            StrategyTag::ArgumentPairs
        );
        assert_eq!(
            tag(json!({
                "task": "leaderboard_bbh_date_understanding",
                "doc": {"input": "When?\nOptions:\n(A) today\n(B) tomorrow"},
                "arguments": [["q", "(A)"], ["q", "(B)"]]
            })),
            StrategyTag::EmbeddedPattern
        );
    }

    #[test]
    fn undeclared_records_classify_by_shape() {
        assert_eq!(
            tag(json!({"doc": {"narrative": "...", "question": "?", "choices": "['a']"}})),
            StrategyTag::Narrative
        );
        assert_eq!(
            tag(json!({"doc": {"Question": "?", "choice1": "a", "choice2": "b"}})),
            StrategyTag::ChoiceFields
        );
        assert_eq!(
            tag(json!({"doc": {"ctx": "A man", "endings": ["runs", "sits"]}})),
            StrategyTag::ChoiceList
        );
        assert_eq!(
            tag(json!({"doc": {"input": "Pick.\n(A) x\n(B) y"}})),
            StrategyTag::EmbeddedPattern
        );
        assert_eq!(
            tag(json!({"arguments": [["p", "yes"], ["p", "no"]]})),
            StrategyTag::ArgumentPairs
        );
        assert_eq!(
            tag(json!({"doc": {"problem": "1+1?"}, "arguments": [["p", {"until": []}]]})),
            StrategyTag::FreeForm
        );
    }

    #[test]
    fn serializes_as_snake_case() {
        assert_eq!(
            serde_json::to_string(&StrategyTag::EmbeddedPattern).unwrap(),
            "\"embedded_pattern\""
        );
        assert_eq!(StrategyTag::FreeForm.to_string(), "free_form");
    }
}
