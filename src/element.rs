//! Decoding of individual lines of the streamed dump.
//!
//! Every line is a JSON object describing either a vertex or an edge.
//! The envelope (`id`, `type`, `label`) is decoded first; the payload
//! is decoded from the same bytes once the label is known.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::error::DumpError;
use crate::model::{DocumentData, MonikerData, MonikerKind, RangeData};
use crate::sets::IdSet;

/// The envelope of one dump line. `raw` keeps the full line so the
/// label-specific payload can be decoded lazily.
#[derive(Debug)]
pub struct Element<'a> {
    pub id: String,
    pub element_type: String,
    pub label: String,
    raw: &'a [u8],
}

pub fn parse_element(line: &[u8]) -> Result<Element<'_>, DumpError> {
    #[derive(Deserialize)]
    struct Envelope {
        #[serde(deserialize_with = "de_id")]
        id: String,
        #[serde(rename = "type")]
        element_type: String,
        #[serde(default)]
        label: String,
    }

    let envelope: Envelope = decode("element", line)?;
    Ok(Element {
        id: envelope.id,
        element_type: envelope.element_type,
        label: envelope.label,
        raw: line,
    })
}

/// Decoded edge payload. `in_v` and `in_vs` are both accepted; which
/// one is meaningful depends on the edge label.
#[derive(Debug, Default)]
pub struct EdgePayload {
    pub out_v: String,
    pub in_v: String,
    pub in_vs: Vec<String>,
    pub document: String,
}

pub fn parse_edge(element: &Element<'_>) -> Result<EdgePayload, DumpError> {
    #[derive(Deserialize)]
    struct RawEdge {
        #[serde(rename = "outV", default, deserialize_with = "de_opt_id")]
        out_v: Option<String>,
        #[serde(rename = "inV", default, deserialize_with = "de_opt_id")]
        in_v: Option<String>,
        #[serde(rename = "inVs", default, deserialize_with = "de_ids")]
        in_vs: Vec<String>,
        #[serde(default, deserialize_with = "de_opt_id")]
        document: Option<String>,
    }

    let raw: RawEdge = decode(&element.label, element.raw)?;
    Ok(EdgePayload {
        out_v: raw.out_v.unwrap_or_default(),
        in_v: raw.in_v.unwrap_or_default(),
        in_vs: raw.in_vs,
        document: raw.document.unwrap_or_default(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaData {
    pub version: String,
    pub project_root: String,
}

/// Decode the metadata vertex and normalize its project root.
///
/// The project root in a dump is either the root of the dump or the
/// root of the repository; normalize to the former by appending the
/// dump root when the project root is not already suffixed by it.
pub fn parse_metadata(element: &Element<'_>, dump_root: &str) -> Result<MetaData, DumpError> {
    #[derive(Deserialize)]
    struct RawMetaData {
        #[serde(default)]
        version: String,
        #[serde(rename = "projectRoot", default)]
        project_root: String,
    }

    let raw: RawMetaData = decode("metaData", element.raw)?;
    let mut project_root = raw.project_root;
    if !project_root.ends_with('/') {
        project_root.push('/');
    }
    if !dump_root.is_empty() && !project_root.starts_with(dump_root) {
        project_root.push_str(dump_root);
    }

    Ok(MetaData {
        version: raw.version,
        project_root,
    })
}

/// Decode a document vertex; the stored URI is the suffix after the
/// project root, which every document URI must begin with.
pub fn parse_document(element: &Element<'_>, project_root: &str) -> Result<DocumentData, DumpError> {
    #[derive(Deserialize)]
    struct RawDocument {
        uri: String,
    }

    let raw: RawDocument = decode("document", element.raw)?;
    let Some(uri) = raw.uri.strip_prefix(project_root) else {
        return Err(DumpError::UriOutsideProjectRoot {
            uri: raw.uri,
            project_root: project_root.to_string(),
        });
    };

    Ok(DocumentData {
        uri: uri.to_string(),
        contains: IdSet::new(),
    })
}

pub fn parse_range(element: &Element<'_>) -> Result<RangeData, DumpError> {
    #[derive(Deserialize)]
    struct Position {
        line: i64,
        character: i64,
    }

    #[derive(Deserialize)]
    struct RawRange {
        start: Position,
        end: Position,
    }

    let raw: RawRange = decode("range", element.raw)?;
    Ok(RangeData {
        start_line: raw.start.line,
        start_character: raw.start.character,
        end_line: raw.end.line,
        end_character: raw.end.character,
        ..RangeData::default()
    })
}

/// Decode a hover vertex into a single normalized markdown string.
///
/// The contents may be a bare string, a marked object with an optional
/// language tag, or a list of either; list parts are joined with a
/// horizontal-rule separator.
pub fn parse_hover(element: &Element<'_>) -> Result<String, DumpError> {
    #[derive(Deserialize)]
    struct RawResult {
        contents: HoverContents,
    }

    #[derive(Deserialize)]
    struct RawHover {
        result: RawResult,
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HoverContents {
        Many(Vec<HoverPart>),
        One(HoverPart),
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HoverPart {
        Text(String),
        Marked {
            #[serde(default)]
            language: Option<String>,
            value: String,
        },
    }

    fn format_part(part: HoverPart) -> String {
        match part {
            HoverPart::Text(text) => text.trim().to_string(),
            HoverPart::Marked {
                language: Some(language),
                value,
            } if !language.is_empty() => format!("```{language}\n{value}\n```"),
            HoverPart::Marked { value, .. } => value.trim().to_string(),
        }
    }

    let raw: RawHover = decode("hoverResult", element.raw)?;
    Ok(match raw.result.contents {
        HoverContents::One(part) => format_part(part),
        HoverContents::Many(parts) => parts
            .into_iter()
            .map(format_part)
            .collect::<Vec<_>>()
            .join("\n\n---\n\n"),
    })
}

pub fn parse_moniker(element: &Element<'_>) -> Result<MonikerData, DumpError> {
    #[derive(Deserialize)]
    struct RawMoniker {
        #[serde(default)]
        kind: MonikerKind,
        #[serde(default)]
        scheme: String,
        #[serde(default)]
        identifier: String,
    }

    let raw: RawMoniker = decode("moniker", element.raw)?;
    Ok(MonikerData {
        kind: raw.kind,
        scheme: raw.scheme,
        identifier: raw.identifier,
        package_information_id: None,
    })
}

pub fn parse_package_information(
    element: &Element<'_>,
) -> Result<crate::model::PackageInformationData, DumpError> {
    decode("packageInformation", element.raw)
}

fn decode<T: DeserializeOwned>(label: &str, raw: &[u8]) -> Result<T, DumpError> {
    serde_json::from_slice(raw).map_err(|source| DumpError::Payload {
        label: label.to_string(),
        source,
    })
}

fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Str(String),
        Int(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Str(s) => s,
        RawId::Int(n) => n.to_string(),
    })
}

fn de_opt_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    de_id(deserializer).map(Some)
}

fn de_ids<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Str(String),
        Int(i64),
    }

    let raw = Vec::<RawId>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|id| match id {
            RawId::Str(s) => s,
            RawId::Int(n) => n.to_string(),
        })
        .collect())
}
