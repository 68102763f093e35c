//! Extraction operations and the validated request record.
//!
//! Forwarding is not free-form: every operation has a fixed backend route
//! and a fixed set of form fields. Anything else is rejected before the
//! request can consume an admission slot.

use std::fmt;

use bytes::Bytes;
use serde::Serialize;

/// Magic bytes every accepted document starts with.
const PDF_MAGIC: &[u8] = b"%PDF-";

// ═══════════════════════════════════════════════════════════
// Operation
// ═══════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Fulltext,
    Header,
    References,
    Citation,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::Fulltext,
        Operation::Header,
        Operation::References,
        Operation::Citation,
    ];

    /// Backend route; the front door exposes the same path.
    pub fn route(self) -> &'static str {
        match self {
            Self::Fulltext => "/api/processFulltextDocument",
            Self::Header => "/api/processHeaderDocument",
            Self::References => "/api/processReferences",
            Self::Citation => "/api/processCitation",
        }
    }

    pub fn from_route(path: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.route() == path)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fulltext => "fulltext",
            Self::Header => "header",
            Self::References => "references",
            Self::Citation => "citation",
        }
    }

    /// Whether the payload is an uploaded document (`input`) rather than text.
    pub fn takes_document(self) -> bool {
        !matches!(self, Self::Citation)
    }

    /// 0/1 flags this operation accepts, in wire names.
    fn flags(self) -> &'static [Flag] {
        match self {
            Self::Fulltext => &[
                Flag::ConsolidateHeader,
                Flag::ConsolidateCitations,
                Flag::IncludeRawCitations,
                Flag::IncludeRawAffiliations,
                Flag::SegmentSentences,
            ],
            Self::Header => &[Flag::ConsolidateHeader],
            Self::References => &[Flag::ConsolidateCitations, Flag::IncludeRawCitations],
            Self::Citation => &[Flag::ConsolidateCitations],
        }
    }

    fn accepts_coordinates(self) -> bool {
        matches!(self, Self::Fulltext)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flag {
    ConsolidateHeader,
    ConsolidateCitations,
    IncludeRawCitations,
    IncludeRawAffiliations,
    SegmentSentences,
}

impl Flag {
    fn wire_name(self) -> &'static str {
        match self {
            Self::ConsolidateHeader => "consolidateHeader",
            Self::ConsolidateCitations => "consolidateCitations",
            Self::IncludeRawCitations => "includeRawCitations",
            Self::IncludeRawAffiliations => "includeRawAffiliations",
            Self::SegmentSentences => "segmentSentences",
        }
    }

    fn from_wire(name: &str) -> Option<Self> {
        [
            Self::ConsolidateHeader,
            Self::ConsolidateCitations,
            Self::IncludeRawCitations,
            Self::IncludeRawAffiliations,
            Self::SegmentSentences,
        ]
        .into_iter()
        .find(|f| f.wire_name() == name)
    }

    /// Value sent when the client leaves the flag out.
    fn default_for(self, operation: Operation) -> bool {
        matches!(
            (self, operation),
            (Self::ConsolidateHeader, Operation::Fulltext | Operation::Header)
        )
    }
}

// ═══════════════════════════════════════════════════════════
// Request record
// ═══════════════════════════════════════════════════════════

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),
    #[error("Field '{0}' is empty")]
    EmptyField(&'static str),
    #[error("Field '{0}' is not accepted by this operation")]
    UnknownField(String),
    #[error("Field '{0}' was supplied more than once")]
    DuplicateField(String),
    #[error("Field '{field}' must be 0 or 1, got {value:?}")]
    InvalidFlag { field: String, value: String },
    #[error("Field '{0}' is not valid UTF-8")]
    InvalidUtf8(String),
    #[error("teiCoordinates entry {0:?} is not an element name")]
    InvalidCoordinate(String),
    #[error("Input is not a PDF document")]
    NotPdf,
}

/// One raw form field as received from the client.
#[derive(Debug, Clone)]
pub struct FormField {
    pub name: String,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl FormField {
    pub fn text(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            file_name: None,
            content_type: None,
            data: Bytes::copy_from_slice(value.as_bytes()),
        }
    }

    pub fn file(name: &str, file_name: &str, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.to_string(),
            file_name: Some(file_name.to_string()),
            content_type: Some("application/pdf".to_string()),
            data: data.into(),
        }
    }

    fn as_text(&self) -> Result<&str, ValidationError> {
        std::str::from_utf8(&self.data).map_err(|_| ValidationError::InvalidUtf8(self.name.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Pdf,
    CitationText,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Document {
        file_name: String,
        content_type: Option<String>,
        bytes: Bytes,
    },
    Citations(String),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Document { bytes, .. } => bytes.len(),
            Self::Citations(text) => text.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn content_kind(&self) -> ContentKind {
        match self {
            Self::Document { .. } => ContentKind::Pdf,
            Self::Citations(_) => ContentKind::CitationText,
        }
    }
}

/// Client options, restricted to what the engine understands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractionOptions {
    pub consolidate_header: Option<bool>,
    pub consolidate_citations: Option<bool>,
    pub include_raw_citations: Option<bool>,
    pub include_raw_affiliations: Option<bool>,
    pub segment_sentences: Option<bool>,
    pub tei_coordinates: Vec<String>,
}

impl ExtractionOptions {
    fn slot(&mut self, flag: Flag) -> &mut Option<bool> {
        match flag {
            Flag::ConsolidateHeader => &mut self.consolidate_header,
            Flag::ConsolidateCitations => &mut self.consolidate_citations,
            Flag::IncludeRawCitations => &mut self.include_raw_citations,
            Flag::IncludeRawAffiliations => &mut self.include_raw_affiliations,
            Flag::SegmentSentences => &mut self.segment_sentences,
        }
    }

    fn get(&self, flag: Flag) -> Option<bool> {
        match flag {
            Flag::ConsolidateHeader => self.consolidate_header,
            Flag::ConsolidateCitations => self.consolidate_citations,
            Flag::IncludeRawCitations => self.include_raw_citations,
            Flag::IncludeRawAffiliations => self.include_raw_affiliations,
            Flag::SegmentSentences => self.segment_sentences,
        }
    }

    /// Form fields forwarded to the engine for `operation`.
    ///
    /// Every flag the operation accepts is sent explicitly, falling back
    /// to the front door's defaults (`consolidateHeader=1`, others 0).
    pub fn form_fields(&self, operation: Operation) -> Vec<(&'static str, String)> {
        let mut fields: Vec<(&'static str, String)> = operation
            .flags()
            .iter()
            .map(|flag| {
                let on = self.get(*flag).unwrap_or(flag.default_for(operation));
                (flag.wire_name(), if on { "1" } else { "0" }.to_string())
            })
            .collect();
        if operation.accepts_coordinates() {
            fields.extend(
                self.tei_coordinates
                    .iter()
                    .map(|element| ("teiCoordinates", element.clone())),
            );
        }
        fields
    }
}

/// A validated inbound extraction call. Immutable once built.
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub operation: Operation,
    pub payload: Payload,
    pub options: ExtractionOptions,
}

impl ExtractionRequest {
    /// Validate raw form fields into a request for `operation`.
    pub fn from_fields(
        operation: Operation,
        fields: Vec<FormField>,
    ) -> Result<Self, ValidationError> {
        let mut options = ExtractionOptions::default();
        let mut document: Option<FormField> = None;
        let mut citations: Option<String> = None;

        for field in fields {
            match field.name.as_str() {
                "input" if operation.takes_document() => {
                    if document.is_some() {
                        return Err(ValidationError::DuplicateField(field.name));
                    }
                    document = Some(field);
                }
                "citations" if !operation.takes_document() => {
                    if citations.is_some() {
                        return Err(ValidationError::DuplicateField(field.name));
                    }
                    citations = Some(field.as_text()?.to_string());
                }
                "teiCoordinates" if operation.accepts_coordinates() => {
                    // An empty field means no coordinates
                    for element in field.as_text()?.split(',') {
                        let element = element.trim();
                        if element.is_empty() {
                            continue;
                        }
                        if !element.chars().all(|c| c.is_ascii_alphanumeric()) {
                            return Err(ValidationError::InvalidCoordinate(element.to_string()));
                        }
                        options.tei_coordinates.push(element.to_string());
                    }
                }
                name => {
                    let flag = Flag::from_wire(name)
                        .filter(|flag| operation.flags().contains(flag))
                        .ok_or_else(|| ValidationError::UnknownField(name.to_string()))?;
                    let slot = options.slot(flag);
                    if slot.is_some() {
                        return Err(ValidationError::DuplicateField(field.name.clone()));
                    }
                    *slot = Some(parse_flag(&field)?);
                }
            }
        }

        let payload = if operation.takes_document() {
            let field = document.ok_or(ValidationError::MissingField("input"))?;
            if field.data.is_empty() {
                return Err(ValidationError::EmptyField("input"));
            }
            if !field.data.starts_with(PDF_MAGIC) {
                return Err(ValidationError::NotPdf);
            }
            Payload::Document {
                file_name: field
                    .file_name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "document.pdf".to_string()),
                content_type: field.content_type,
                bytes: field.data,
            }
        } else {
            let text = citations.ok_or(ValidationError::MissingField("citations"))?;
            if text.trim().is_empty() {
                return Err(ValidationError::EmptyField("citations"));
            }
            Payload::Citations(text)
        };

        Ok(Self {
            operation,
            payload,
            options,
        })
    }

    /// Short label for logs and events (file name or "citation").
    pub fn label(&self) -> &str {
        match &self.payload {
            Payload::Document { file_name, .. } => file_name,
            Payload::Citations(_) => "citation",
        }
    }
}

fn parse_flag(field: &FormField) -> Result<bool, ValidationError> {
    match field.as_text()?.trim() {
        "0" => Ok(false),
        "1" => Ok(true),
        other => Err(ValidationError::InvalidFlag {
            field: field.name.clone(),
            value: other.to_string(),
        }),
    }
}
