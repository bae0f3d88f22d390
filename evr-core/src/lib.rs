//! Core library for normalizing heterogeneous evaluation records into
//! canonical, render-ready samples.

pub mod choices;
pub mod classify;
pub mod collection;
pub mod config;
pub mod engine;
pub mod error;
pub mod literal;
pub mod patterns;
pub mod record;
pub mod resolve;
pub mod sample;

pub use choices::Choice;
pub use choices::ChoiceSet;
pub use choices::LabelScheme;
pub use choices::extract_choices;
pub use classify::StrategyTag;
pub use classify::TaskRegistry;
pub use classify::classify;
pub use collection::AnalyzedSample;
pub use collection::SequencedRecord;
pub use collection::TaskBatch;
pub use config::EngineConfig;
pub use config::FallbackSettings;
pub use config::FieldSettings;
pub use config::LoadedConfig;
pub use config::TaskRule;
pub use config::load_config;
pub use config::load_config_from;
pub use engine::SampleEngine;
pub use error::ExtractError;
pub use literal::LiteralError;
pub use record::ArgumentPair;
pub use record::ChoiceContainer;
pub use record::RawRecord;
pub use resolve::Confidence;
pub use resolve::Resolution;
pub use resolve::ResolvedAnswer;
pub use resolve::resolve;
pub use sample::CanonicalSample;
pub use sample::assemble;
pub use sample::assemble_with_signal;
