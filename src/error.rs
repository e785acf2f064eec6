use thiserror::Error;

/// Errors surfaced while decoding and correlating an LSIF dump.
///
/// Structural inconsistencies abort the conversion at the first
/// offending element; nothing in the dump is recoverable past that
/// point because later edges may depend on the rejected data.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("no metadata defined")]
    MissingMetaData,

    #[error("malformed dump: edge {id} references {references}, expected {}", kinds.join(" or "))]
    MalformedDump {
        /// Identifier of the offending edge.
        id: String,
        /// Identifier of the endpoint that failed to resolve.
        references: String,
        /// Entity kinds that would have been acceptable.
        kinds: Vec<&'static str>,
    },

    #[error("unknown element type {0:?}")]
    UnknownElementType(String),

    #[error("invalid {label} payload: {source}")]
    Payload {
        label: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("document URI {uri} is not relative to project root {project_root}")]
    UriOutsideProjectRoot { uri: String, project_root: String },

    #[error("conversion cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DumpError {
    pub fn malformed(id: &str, references: &str, kinds: &[&'static str]) -> Self {
        DumpError::MalformedDump {
            id: id.to_string(),
            references: references.to_string(),
            kinds: kinds.to_vec(),
        }
    }
}
