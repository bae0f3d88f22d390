use std::env;
use std::path::Path;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use anyhow::anyhow;
use anyhow::bail;
use config::Config as ConfigLoader;
use config::Environment;
use config::File;
use config::FileFormat;
use serde::Deserialize;
use serde::Serialize;

use crate::classify::StrategyTag;

/// Embedded defaults. Always loaded first so user files only need to name
/// the keys they change.
pub const DEFAULT_CONFIG_TEMPLATE: &str = include_str!("../config/default.toml");

/// Configuration together with the user file it was read from, if any.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: EngineConfig,
    pub source: Option<PathBuf>,
}

/// Load configuration for `app_name` from the embedded defaults, the user's
/// `$XDG_CONFIG_HOME/<app_name>/config.toml` when it exists, and
/// `<APP_NAME>__SECTION__KEY` environment variables.
pub fn load_config(app_name: impl AsRef<str>) -> Result<LoadedConfig> {
    let app_name = app_name.as_ref();
    let discovered = default_config_file(app_name).filter(|path| path.is_file());
    build_config(app_name, discovered)
}

/// Like [`load_config`] but reads an explicit file instead of the XDG one.
/// `~` and `$VAR` references in `path` are expanded.
pub fn load_config_from(app_name: impl AsRef<str>, path: &str) -> Result<LoadedConfig> {
    let app_name = app_name.as_ref();
    let cwd = env::current_dir().context("unable to determine current directory")?;
    let resolved = resolve_path_value(path, &cwd)?;
    if !resolved.is_file() {
        bail!("config file {} does not exist", resolved.display());
    }
    build_config(app_name, Some(resolved))
}

fn build_config(app_name: &str, source: Option<PathBuf>) -> Result<LoadedConfig> {
    let env_prefix = app_name
        .chars()
        .map(|ch| if ch == '-' { '_' } else { ch })
        .collect::<String>()
        .to_ascii_uppercase();

    let mut builder = ConfigLoader::builder()
        .add_source(File::from_str(DEFAULT_CONFIG_TEMPLATE, FileFormat::Toml));

    if let Some(path) = source.as_ref() {
        builder = builder.add_source(File::from(path.clone()));
    }

    builder = builder.add_source(
        Environment::with_prefix(&env_prefix)
            .separator("__")
            .try_parsing(true),
    );

    let described = source
        .as_ref()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "embedded defaults".to_string());

    let mut config: EngineConfig = builder
        .build()
        .with_context(|| format!("failed to parse configuration from {described}"))?
        .try_deserialize()
        .context("failed to deserialize configuration into EngineConfig")?;

    config.normalize()?;

    tracing::debug!(
        source = %described,
        rules = config.tasks.len(),
        "loaded engine configuration"
    );

    Ok(LoadedConfig { config, source })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub tasks: Vec<TaskRule>,
    pub fields: FieldSettings,
    pub fallback: FallbackSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let rules = [
            ("musr", StrategyTag::Narrative),
            ("gpqa", StrategyTag::ChoiceFields),
            ("bbh", StrategyTag::EmbeddedPattern),
            ("mmlu", StrategyTag::ChoiceList),
            ("hellaswag", StrategyTag::ChoiceList),
            ("arc_", StrategyTag::ChoiceList),
            ("truthfulqa", StrategyTag::ChoiceList),
            ("math", StrategyTag::FreeForm),
            ("gsm8k", StrategyTag::FreeForm),
            ("ifeval", StrategyTag::FreeForm),
        ];

        Self {
            tasks: rules
                .into_iter()
                .map(|(pattern, strategy)| TaskRule::new(pattern, strategy))
                .collect(),
            fields: FieldSettings::default(),
            fallback: FallbackSettings::default(),
        }
    }
}

impl EngineConfig {
    pub fn normalize(&mut self) -> Result<()> {
        for (index, rule) in self.tasks.iter_mut().enumerate() {
            rule.pattern = rule.pattern.trim().to_lowercase();
            if rule.pattern.is_empty() {
                bail!("task rule {index} has an empty pattern");
            }
        }

        if self.fallback.max_raw_chars == 0 {
            bail!("fallback.max_raw_chars must be greater than zero");
        }

        Ok(())
    }
}

/// Maps declared task names containing `pattern` to a strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRule {
    pub pattern: String,
    pub strategy: StrategyTag,
}

impl TaskRule {
    pub fn new(pattern: impl Into<String>, strategy: StrategyTag) -> Self {
        Self {
            pattern: pattern.into(),
            strategy,
        }
    }
}

/// Field names consulted, in order, when reading a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldSettings {
    /// Record-level fields naming the task the record belongs to.
    pub task_fields: Vec<String>,
    /// Document fields holding question or context text.
    pub question_fields: Vec<String>,
    /// Document fields holding a choice container.
    pub choice_containers: Vec<String>,
    /// Document fields holding a reference answer for free-form tasks.
    pub reference_fields: Vec<String>,
    /// Record-level fields holding an explicit model selection.
    pub selection_fields: Vec<String>,
    /// Record-level fields holding per-choice scores.
    pub score_fields: Vec<String>,
    /// Record-level fields holding the generated response.
    pub response_fields: Vec<String>,
}

impl Default for FieldSettings {
    fn default() -> Self {
        fn owned(names: &[&str]) -> Vec<String> {
            names.iter().map(|name| (*name).to_string()).collect()
        }

        Self {
            task_fields: owned(&["task", "task_name"]),
            question_fields: owned(&[
                "question", "Question", "input", "query", "problem", "prompt", "ctx",
            ]),
            choice_containers: owned(&["choices", "options", "endings"]),
            reference_fields: owned(&["answer", "solution", "reference", "target"]),
            selection_fields: owned(&["prediction", "pred", "model_answer"]),
            score_fields: owned(&["filtered_resps", "resps", "scores", "logprobs"]),
            response_fields: owned(&["filtered_resps", "resps", "response", "output"]),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    /// Longest raw text carried into a sample before truncation.
    pub max_raw_chars: usize,
    pub ellipsis: String,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        Self {
            max_raw_chars: 200,
            ellipsis: "...".to_string(),
        }
    }
}

impl FallbackSettings {
    /// Cut `text` to `max_raw_chars` characters, appending the ellipsis when
    /// anything was dropped.
    pub fn truncate(&self, text: &str) -> String {
        match text.char_indices().nth(self.max_raw_chars) {
            Some((cut, _)) => format!("{}{}", &text[..cut], self.ellipsis),
            None => text.to_string(),
        }
    }
}

fn default_config_file(app_name: &str) -> Option<PathBuf> {
    let base = env::var("XDG_CONFIG_HOME")
        .ok()
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
        .or_else(|| home_dir().map(|home| home.join(".config")))?;
    Some(base.join(app_name).join("config.toml"))
}

pub fn resolve_path_value(value: &str, base_dir: &Path) -> Result<PathBuf> {
    let expanded = expand_path(value)?;
    let path = PathBuf::from(&expanded);
    if path.is_absolute() {
        Ok(path.components().collect())
    } else {
        Ok(base_dir.join(path))
    }
}

fn expand_path(value: &str) -> Result<String> {
    let home = home_dir();
    let home_utf8 = match home.as_ref() {
        Some(path) => Some(
            path.to_str()
                .ok_or_else(|| anyhow!("home directory contains invalid UTF-8"))?
                .to_string(),
        ),
        None => None,
    };

    let expanded = shellexpand::full_with_context(
        value,
        || home_utf8.as_deref(),
        |var| Ok(env::var(var).ok()),
    )
    .map_err(|error: shellexpand::LookupError<std::env::VarError>| {
        anyhow!("failed to expand '{value}': {error}")
    })?;
    Ok(expanded.into_owned())
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(|| env::var_os("USERPROFILE").map(PathBuf::from))
}
