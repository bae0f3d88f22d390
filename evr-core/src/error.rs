//! Recoverable failures raised inside the normalization stages.
//!
//! None of these escape [`crate::assemble`]: the stage that detects one logs
//! it and degrades its own contribution to the canonical sample.

use thiserror::Error;

use crate::literal::LiteralError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractError {
    /// A target or selection could not be read as a label, index or choice text.
    #[error("cannot interpret {value} as a choice position")]
    TypeCoercion { value: String },

    /// An index was obtained but no choice sits at that position.
    #[error("position {index} is outside the {len} extracted choices")]
    OutOfRange { index: i64, len: usize },

    /// An expected field is absent from the record.
    #[error("record has no '{0}' field")]
    MissingField(String),

    /// A string-encoded choice list could not be parsed.
    #[error("malformed choice encoding: {0}")]
    MalformedEncoding(#[from] LiteralError),

    /// No extraction strategy recognized the record's shape.
    #[error("no choice-bearing field recognized")]
    Unclassifiable,
}

impl ExtractError {
    pub fn coercion(value: impl std::fmt::Display) -> Self {
        Self::TypeCoercion {
            value: value.to_string(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_offending_value() {
        let err = ExtractError::coercion("\"N/A\"");
        assert_eq!(
            err.to_string(),
            "cannot interpret \"N/A\" as a choice position"
        );

        let err = ExtractError::OutOfRange { index: 7, len: 4 };
        assert!(err.to_string().contains("position 7"));
    }

    #[test]
    fn literal_errors_convert_into_malformed_encoding() {
        let err: ExtractError = LiteralError::Unterminated { offset: 3 }.into();
        assert!(matches!(err, ExtractError::MalformedEncoding(_)));
    }
}
