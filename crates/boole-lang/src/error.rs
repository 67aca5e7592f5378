use thiserror::Error;

/// Failures of the textual tree form.
#[derive(Debug, Error)]
pub enum LangError {
    #[error("tree parse error: {0}")]
    Parse(String),
}

impl From<pest::error::Error<crate::parser::Rule>> for LangError {
    fn from(e: pest::error::Error<crate::parser::Rule>) -> Self {
        Self::Parse(e.to_string())
    }
}
