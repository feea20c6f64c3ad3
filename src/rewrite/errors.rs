use thiserror::Error;

#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("invalid {what} '{token}': expected a non-empty identifier")]
    InvalidToken { what: &'static str, token: String },

    #[error("failed to compile rewrite pattern for '{token}': {source}")]
    Pattern {
        token: String,
        #[source]
        source: regex::Error,
    },
}
