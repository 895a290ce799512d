// Error taxonomy for the consolidation pipeline
//
// Item-level failures (one URL, one file) are recoverable: the caller logs
// them and moves on to the next item. Only the total absence of usable
// output escalates to `Fatal`, which aborts the run with a non-zero exit.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network/HTTP failure or timeout on an individual resource.
    /// Recoverable: skip the item and continue with its siblings.
    #[error("fetch failed for {url}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// A file could not be decoded/parsed under any supported policy.
    /// Recoverable: skip the file and continue.
    #[error("cannot parse {path}: {detail}")]
    Parse { path: String, detail: String },

    /// A required field could not be resolved after normalization.
    /// Recoverable at file granularity during ingestion; fatal for the
    /// registry load, where there is only one file.
    #[error("schema error in {context}: no usable {missing} column")]
    Schema { context: String, missing: String },

    /// Filesystem failure on a pipeline-owned path.
    #[error("i/o error at {path}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// No periods discovered, nothing ingested, registry unavailable.
    /// Aborts the run.
    #[error("{0}")]
    Fatal(String),
}

impl PipelineError {
    pub fn fetch(url: impl Into<String>, source: reqwest::Error) -> Self {
        PipelineError::Fetch {
            url: url.into(),
            source,
        }
    }

    pub fn parse(path: impl Into<String>, detail: impl Into<String>) -> Self {
        PipelineError::Parse {
            path: path.into(),
            detail: detail.into(),
        }
    }

    pub fn schema(context: impl Into<String>, missing: impl Into<String>) -> Self {
        PipelineError::Schema {
            context: context.into(),
            missing: missing.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// True when the run must stop instead of skipping the item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PipelineError::Fatal(_))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_detection() {
        assert!(PipelineError::Fatal("no periods".to_string()).is_fatal());
        assert!(!PipelineError::parse("x.csv", "bad delimiter").is_fatal());
        assert!(!PipelineError::schema("x.csv", "ValorDespesas").is_fatal());
    }

    #[test]
    fn test_schema_error_message_names_missing_column() {
        let err = PipelineError::schema("cadop.csv", "RegistroANS");
        let msg = err.to_string();
        assert!(msg.contains("cadop.csv"));
        assert!(msg.contains("RegistroANS"));
    }
}
