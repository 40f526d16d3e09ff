use oxrdf::NamedNode;
use thiserror::Error;

/// An error raised when converting between RDF literals and native values.
#[derive(Debug, Clone, Error)]
pub enum TermError {
    /// The requested coercion is not defined for the literal's datatype.
    #[error("no native conversion defined for datatype {datatype}")]
    TypeError { datatype: NamedNode },
    /// The lexical form does not belong to the lexical space of the datatype.
    #[error("'{lexical}' is not a valid lexical form for {datatype}")]
    LexicalError { lexical: String, datatype: NamedNode },
}

impl TermError {
    pub fn lexical(lexical: impl Into<String>, datatype: NamedNode) -> Self {
        TermError::LexicalError {
            lexical: lexical.into(),
            datatype,
        }
    }
}
