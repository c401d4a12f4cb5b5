//! Core data types shared by both rounds.
//!
//! Documents own their sentences; everything produced later (chunks, applied
//! codes) refers back to documents by name and to codes by name only.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CoderError;
use crate::segmenter;

/// 1-based position of a sentence inside its document.
pub type SentenceId = u32;

// ── Modes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Codes are applied to individual sentences.
    Coding,
    /// Codes are applied to whole documents.
    Categorization,
}

impl AnalysisMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coding => "coding",
            Self::Categorization => "categorization",
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coding" => Ok(Self::Coding),
            "categorization" => Ok(Self::Categorization),
            other => Err(format!(
                "invalid mode '{other}', expected 'coding' or 'categorization'"
            )),
        }
    }
}

/// How deep the code hierarchy of a synthesized code book may go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HierarchyDepth {
    #[default]
    #[serde(rename = "1")]
    Flat,
    #[serde(rename = "2")]
    TwoLevel,
    #[serde(rename = "arbitrary")]
    Arbitrary,
}

impl HierarchyDepth {
    pub fn is_flat(&self) -> bool {
        matches!(self, Self::Flat)
    }
}

impl FromStr for HierarchyDepth {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1" | "flat" => Ok(Self::Flat),
            "2" | "two-level" => Ok(Self::TwoLevel),
            "arbitrary" => Ok(Self::Arbitrary),
            other => Err(format!(
                "invalid hierarchy depth '{other}', expected '1', '2' or 'arbitrary'"
            )),
        }
    }
}

// ── Documents ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub id: SentenceId,
    pub text: String,
    /// Name of the owning document.
    pub document: String,
}

impl fmt::Display for Sentence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.id, self.text)
    }
}

/// A loaded document and its sentences (ids `1..=N`, contiguous).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub name: String,
    pub content: String,
    sentences: Vec<Sentence>,
}

impl Document {
    /// Build a document and segment its content.
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Result<Self, CoderError> {
        let name = name.into();
        let content = content.into();
        let sentences = segmenter::segment_document(&name, &content)?;
        Ok(Self {
            name,
            content,
            sentences,
        })
    }

    pub fn sentences(&self) -> &[Sentence] {
        &self.sentences
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn sentence(&self, id: SentenceId) -> Option<&Sentence> {
        let idx = usize::try_from(id).ok()?.checked_sub(1)?;
        self.sentences.get(idx)
    }

    /// Sentences `start..=end`; empty when the range falls outside the document.
    pub fn sentences_in(&self, start: SentenceId, end: SentenceId) -> &[Sentence] {
        let (start, end) = (start as usize, end as usize);
        if start == 0 || start > end || end > self.sentences.len() {
            return &[];
        }
        &self.sentences[start - 1..end]
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Document({}, {} sentences)", self.name, self.sentences.len())
    }
}

// ── Codes ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Code {
    pub name: String,
    pub description: String,
    /// When to apply this code.
    pub criteria: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl Code {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        criteria: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            criteria: criteria.into(),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBook {
    pub mode: AnalysisMode,
    /// The user's research question and context.
    #[serde(default)]
    pub context: String,
    #[serde(default, skip_serializing_if = "HierarchyDepth::is_flat")]
    pub hierarchy: HierarchyDepth,
    pub codes: Vec<Code>,
}

impl CodeBook {
    pub fn new(mode: AnalysisMode, context: impl Into<String>, codes: Vec<Code>) -> Self {
        Self {
            mode,
            context: context.into(),
            hierarchy: HierarchyDepth::Flat,
            codes,
        }
    }

    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: HierarchyDepth) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub fn get_code(&self, name: &str) -> Option<&Code> {
        self.codes.iter().find(|c| c.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get_code(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn roots(&self) -> impl Iterator<Item = &Code> {
        self.codes.iter().filter(|c| c.parent.is_none())
    }

    pub fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a Code> {
        self.codes
            .iter()
            .filter(move |c| c.parent.as_deref() == Some(parent))
    }

    /// Check names, required text and the parent structure.
    ///
    /// Fails on the first offending code; duplicates are reported, never merged.
    pub fn validate(&self) -> Result<(), CoderError> {
        let mut seen = HashSet::with_capacity(self.codes.len());
        for code in &self.codes {
            if code.name.trim().is_empty() {
                return Err(CoderError::code_book(&code.name, "has an empty name"));
            }
            if !seen.insert(code.name.as_str()) {
                return Err(CoderError::code_book(&code.name, "is defined more than once"));
            }
            if code.description.trim().is_empty() {
                return Err(CoderError::code_book(&code.name, "has an empty description"));
            }
            if code.criteria.trim().is_empty() {
                return Err(CoderError::code_book(&code.name, "has empty criteria"));
            }
        }
        self.validate_hierarchy()
    }

    fn validate_hierarchy(&self) -> Result<(), CoderError> {
        let parents: HashMap<&str, Option<&str>> = self
            .codes
            .iter()
            .map(|c| (c.name.as_str(), c.parent.as_deref()))
            .collect();

        for code in &self.codes {
            let Some(parent) = code.parent.as_deref() else {
                continue;
            };
            if self.hierarchy.is_flat() {
                return Err(CoderError::code_book(
                    &code.name,
                    format!("has parent {parent:?} but the code book is flat"),
                ));
            }
            if parent == code.name {
                return Err(CoderError::code_book(&code.name, "is its own parent"));
            }
            let Some(grandparent) = parents.get(parent) else {
                return Err(CoderError::code_book(
                    &code.name,
                    format!("refers to unknown parent {parent:?}"),
                ));
            };
            if self.hierarchy == HierarchyDepth::TwoLevel && grandparent.is_some() {
                return Err(CoderError::code_book(
                    &code.name,
                    format!("is nested deeper than two levels under {parent:?}"),
                ));
            }

            // Walking up more steps than there are codes means a cycle.
            let mut current = Some(parent);
            let mut steps = 0;
            while let Some(name) = current {
                steps += 1;
                if steps > self.codes.len() {
                    return Err(CoderError::code_book(
                        &code.name,
                        "is part of a parent cycle",
                    ));
                }
                current = parents.get(name).copied().flatten();
            }
        }
        Ok(())
    }
}

impl fmt::Display for CodeBook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CodeBook({} codes, mode={})", self.codes.len(), self.mode)
    }
}

// ── Chunks ───────────────────────────────────────────────────────────

/// A contiguous sentence range `[start, end]` of one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub document: String,
    pub start: SentenceId,
    pub end: SentenceId,
    /// False when the planner judged the range irrelevant; such chunks are
    /// never sent to the model.
    pub should_code: bool,
    pub rationale: String,
}

impl Chunk {
    pub fn range(&self) -> (SentenceId, SentenceId) {
        (self.start, self.end)
    }

    pub fn contains(&self, id: SentenceId) -> bool {
        self.start <= id && id <= self.end
    }

    pub fn len(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.should_code {
            "relevant"
        } else {
            "irrelevant"
        };
        write!(
            f,
            "Chunk[{}:{}-{}] ({} sentences, {status})",
            self.document,
            self.start,
            self.end,
            self.len()
        )
    }
}

// ── Applied codes ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentenceCode {
    pub document_name: String,
    pub sentence_id: SentenceId,
    pub code_name: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentCode {
    pub document_name: String,
    pub code_name: String,
    #[serde(default)]
    pub rationale: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AppliedCodes {
    SentenceCodes(Vec<SentenceCode>),
    DocumentCodes(Vec<DocumentCode>),
}

impl AppliedCodes {
    pub fn empty(mode: AnalysisMode) -> Self {
        match mode {
            AnalysisMode::Coding => Self::SentenceCodes(Vec::new()),
            AnalysisMode::Categorization => Self::DocumentCodes(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::SentenceCodes(v) => v.len(),
            Self::DocumentCodes(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn mode(&self) -> AnalysisMode {
        match self {
            Self::SentenceCodes(_) => AnalysisMode::Coding,
            Self::DocumentCodes(_) => AnalysisMode::Categorization,
        }
    }
}

// ── Round 1 notes ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentNote {
    pub document: String,
    pub note: String,
}

/// Notes from Round 1 in input document order.
///
/// Persisted as a JSON object (document name → note) whose key order is the
/// reading order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentNotes(Vec<DocumentNote>);

impl DocumentNotes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, document: impl Into<String>, note: impl Into<String>) {
        self.0.push(DocumentNote {
            document: document.into(),
            note: note.into(),
        });
    }

    pub fn get(&self, document: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|n| n.document == document)
            .map(|n| n.note.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DocumentNote> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// All notes joined for the synthesis prompt.
    pub fn concatenated(&self) -> String {
        self.0
            .iter()
            .map(|n| format!("Document {}:\n{}", n.document, n.note.trim()))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl Serialize for DocumentNotes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for n in &self.0 {
            map.serialize_entry(&n.document, &n.note)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for DocumentNotes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct NotesVisitor;

        impl<'de> Visitor<'de> for NotesVisitor {
            type Value = DocumentNotes;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of document name to note text")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut notes = DocumentNotes::new();
                while let Some((document, note)) = access.next_entry::<String, String>()? {
                    if notes.get(&document).is_some() {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate note for {document}"
                        )));
                    }
                    notes.push(document, note);
                }
                Ok(notes)
            }
        }

        deserializer.deserialize_map(NotesVisitor)
    }
}

// ── Result ───────────────────────────────────────────────────────────

/// Terminal artifact of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub mode: AnalysisMode,
    pub code_book: CodeBook,
    #[serde(flatten)]
    pub codes: AppliedCodes,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<DocumentNotes>,
}

impl AnalysisResult {
    pub fn sentence_codes(&self) -> &[SentenceCode] {
        match &self.codes {
            AppliedCodes::SentenceCodes(v) => v,
            AppliedCodes::DocumentCodes(_) => &[],
        }
    }

    pub fn document_codes(&self) -> &[DocumentCode] {
        match &self.codes {
            AppliedCodes::DocumentCodes(v) => v,
            AppliedCodes::SentenceCodes(_) => &[],
        }
    }

    pub fn codes_for_sentence(&self, document: &str, id: SentenceId) -> Vec<&SentenceCode> {
        self.sentence_codes()
            .iter()
            .filter(|sc| sc.document_name == document && sc.sentence_id == id)
            .collect()
    }

    pub fn codes_for_document(&self, document: &str) -> Vec<&DocumentCode> {
        self.document_codes()
            .iter()
            .filter(|dc| dc.document_name == document)
            .collect()
    }

    pub fn sentences_for_code(&self, code_name: &str) -> Vec<&SentenceCode> {
        self.sentence_codes()
            .iter()
            .filter(|sc| sc.code_name == code_name)
            .collect()
    }

    /// Number of applications per code name, sorted by name.
    pub fn code_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        let names: Box<dyn Iterator<Item = &str> + '_> = match &self.codes {
            AppliedCodes::SentenceCodes(v) => Box::new(v.iter().map(|c| c.code_name.as_str())),
            AppliedCodes::DocumentCodes(v) => Box::new(v.iter().map(|c| c.code_name.as_str())),
        };
        for name in names {
            *counts.entry(name).or_insert(0) += 1;
        }
        counts
    }

    /// Number of distinct documents that received at least one code.
    pub fn coded_document_count(&self) -> usize {
        let names: HashSet<&str> = match &self.codes {
            AppliedCodes::SentenceCodes(v) => v.iter().map(|c| c.document_name.as_str()).collect(),
            AppliedCodes::DocumentCodes(v) => v.iter().map(|c| c.document_name.as_str()).collect(),
        };
        names.len()
    }

    /// Check that the applied codes match the mode and only name codes of the
    /// embedded code book.
    pub fn check_code_references(&self) -> Result<(), CoderError> {
        if self.codes.mode() != self.mode || self.code_book.mode != self.mode {
            return Err(CoderError::ModeMismatch {
                expected: self.mode,
                found: if self.code_book.mode != self.mode {
                    self.code_book.mode
                } else {
                    self.codes.mode()
                },
            });
        }
        let unknown = |document: &str, code: &str| CoderError::CodeReference {
            document: document.to_string(),
            range: None,
            reason: format!("unknown code {code:?}"),
        };
        match &self.codes {
            AppliedCodes::SentenceCodes(v) => {
                for sc in v {
                    if !self.code_book.contains(&sc.code_name) {
                        return Err(unknown(&sc.document_name, &sc.code_name));
                    }
                }
            }
            AppliedCodes::DocumentCodes(v) => {
                for dc in v {
                    if !self.code_book.contains(&dc.code_name) {
                        return Err(unknown(&dc.document_name, &dc.code_name));
                    }
                }
            }
        }
        Ok(())
    }

    /// Full reference check: codes, documents and sentence ids.
    pub fn verify(&self, documents: &[Document]) -> Result<(), CoderError> {
        self.check_code_references()?;
        let sizes: HashMap<&str, usize> = documents
            .iter()
            .map(|d| (d.name.as_str(), d.sentence_count()))
            .collect();
        let missing = |document: &str| CoderError::CodeReference {
            document: document.to_string(),
            range: None,
            reason: "document is not part of the run".to_string(),
        };
        match &self.codes {
            AppliedCodes::SentenceCodes(v) => {
                for sc in v {
                    let n = *sizes
                        .get(sc.document_name.as_str())
                        .ok_or_else(|| missing(&sc.document_name))?;
                    if sc.sentence_id == 0 || sc.sentence_id as usize > n {
                        return Err(CoderError::CodeReference {
                            document: sc.document_name.clone(),
                            range: None,
                            reason: format!(
                                "sentence {} does not exist (document has {n})",
                                sc.sentence_id
                            ),
                        });
                    }
                }
            }
            AppliedCodes::DocumentCodes(v) => {
                for dc in v {
                    if !sizes.contains_key(dc.document_name.as_str()) {
                        return Err(missing(&dc.document_name));
                    }
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for AnalysisResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.codes {
            AppliedCodes::SentenceCodes(v) => {
                write!(f, "AnalysisResult(coding: {} coded sentences)", v.len())
            }
            AppliedCodes::DocumentCodes(v) => write!(
                f,
                "AnalysisResult(categorization: {} codes over {} documents)",
                v.len(),
                self.coded_document_count()
            ),
        }
    }
}
