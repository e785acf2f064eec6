use serde::Deserialize;

use crate::sets::IdSet;

/// A source file named by the dump, with the ranges it contains.
/// The URI is stored relative to the project root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentData {
    pub uri: String,
    pub contains: IdSet,
}

/// A region of a document (0-indexed, inclusive bounds) and the result
/// identifiers attributed to it. Result ids may be inherited from
/// result sets during canonicalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeData {
    pub start_line: i64,
    pub start_character: i64,
    pub end_line: i64,
    pub end_character: i64,
    pub definition_result_id: Option<String>,
    pub reference_result_id: Option<String>,
    pub hover_result_id: Option<String>,
    pub moniker_ids: IdSet,
}

/// A reusable indirection target carrying the same attributions as a
/// range, shared by ranges that point at it via `next` edges.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSetData {
    pub definition_result_id: Option<String>,
    pub reference_result_id: Option<String>,
    pub hover_result_id: Option<String>,
    pub moniker_ids: IdSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonikerKind {
    #[default]
    Local,
    Import,
    Export,
}

impl MonikerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MonikerKind::Local => "local",
            MonikerKind::Import => "import",
            MonikerKind::Export => "export",
        }
    }
}

/// A globally meaningful name for a symbol within some ecosystem
/// (`scheme`). Non-local monikers bridge separately indexed projects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonikerData {
    pub kind: MonikerKind,
    pub scheme: String,
    pub identifier: String,
    pub package_information_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PackageInformationData {
    pub name: String,
    pub version: String,
}
