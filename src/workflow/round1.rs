/// Round 1: read every document, then synthesize a code book from the notes.
///
/// The controller is an explicit state machine. [`Round1Controller::step`]
/// takes a state by value and returns the next one, so each transition can be
/// driven and checked on its own.
use futures_util::{StreamExt, TryStreamExt, stream};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::CoderError;
use crate::llm::{LlmGateway, Stage, generate_structured};
use crate::model::{AnalysisMode, Code, CodeBook, Document, DocumentNotes, HierarchyDepth};
use crate::prompts;

/// Notes taken on a single document.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NotesDraft {
    /// Structured notes about themes and candidate codes.
    pub notes: String,
}

/// Code book as proposed by the model.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeBookDraft {
    pub codes: Vec<CodeDraft>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CodeDraft {
    pub name: String,
    pub description: String,
    /// When to apply this code.
    pub criteria: String,
    /// Name of the parent code, if any.
    #[serde(default)]
    pub parent: Option<String>,
}

impl From<CodeDraft> for Code {
    fn from(draft: CodeDraft) -> Self {
        let code = Code::new(draft.name.trim(), draft.description, draft.criteria);
        match draft.parent.as_deref().map(str::trim) {
            Some(parent) if !parent.is_empty() => code.with_parent(parent),
            _ => code,
        }
    }
}

/// Soft guideline for the size of a synthesized code book.
const RECOMMENDED_CODES: std::ops::RangeInclusive<usize> = 5..=10;

// ── Synthesizer ──────────────────────────────────────────────────────

/// Turns accumulated notes into a validated code book.
pub struct CodeBookSynthesizer<'a> {
    gateway: &'a dyn LlmGateway,
    mode: AnalysisMode,
    context: &'a str,
    hierarchy: HierarchyDepth,
}

impl<'a> CodeBookSynthesizer<'a> {
    pub fn new(gateway: &'a dyn LlmGateway, mode: AnalysisMode, context: &'a str) -> Self {
        Self {
            gateway,
            mode,
            context,
            hierarchy: HierarchyDepth::Flat,
        }
    }

    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: HierarchyDepth) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    pub async fn synthesize(&self, notes: &DocumentNotes) -> Result<CodeBook, CoderError> {
        let prompt =
            prompts::create_code_book(self.mode, self.context, &notes.concatenated(), self.hierarchy);
        let draft: CodeBookDraft =
            generate_structured(self.gateway, Stage::CreateCodeBook, "code book", prompt)
                .await
                .map_err(|source| CoderError::Llm {
                    stage: Stage::CreateCodeBook,
                    subject: "code book".to_string(),
                    source,
                })?;

        let codes = draft.codes.into_iter().map(Code::from).collect();
        let code_book = CodeBook::new(self.mode, self.context, codes).with_hierarchy(self.hierarchy);
        code_book.validate()?;

        if !RECOMMENDED_CODES.contains(&code_book.len()) {
            warn!(
                "Code book has {} codes (recommended {}-{})",
                code_book.len(),
                RECOMMENDED_CODES.start(),
                RECOMMENDED_CODES.end()
            );
        }
        info!("Created {code_book}");
        Ok(code_book)
    }
}

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum Round1State {
    /// Documents before `next` have notes.
    Reading { next: usize, notes: DocumentNotes },
    Synthesizing { notes: DocumentNotes },
    Done { code_book: CodeBook, notes: DocumentNotes },
}

impl Round1State {
    pub fn start() -> Self {
        Self::Reading {
            next: 0,
            notes: DocumentNotes::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Output of a finished Round 1.
#[derive(Debug, Clone, PartialEq)]
pub struct Round1Outcome {
    pub code_book: CodeBook,
    pub notes: DocumentNotes,
}

pub struct Round1Controller<'a> {
    gateway: &'a dyn LlmGateway,
    documents: &'a [Document],
    mode: AnalysisMode,
    context: &'a str,
    hierarchy: HierarchyDepth,
    concurrency: usize,
}

impl<'a> Round1Controller<'a> {
    pub fn new(
        gateway: &'a dyn LlmGateway,
        documents: &'a [Document],
        mode: AnalysisMode,
        context: &'a str,
    ) -> Self {
        Self {
            gateway,
            documents,
            mode,
            context,
            hierarchy: HierarchyDepth::Flat,
            concurrency: 1,
        }
    }

    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: HierarchyDepth) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Number of documents read at the same time.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Advance by one transition.
    ///
    /// `Reading` consumes one batch of up to `concurrency` documents; notes are
    /// appended in input order regardless of which call finished first. When
    /// several reads in a batch fail, the earliest document's error is returned.
    pub async fn step(&self, state: Round1State) -> Result<Round1State, CoderError> {
        match state {
            Round1State::Reading { next, mut notes } => {
                let total = self.documents.len();
                if next >= total {
                    return Ok(Round1State::Synthesizing { notes });
                }

                let end = (next + self.concurrency).min(total);
                let batch = &self.documents[next..end];
                let results: Vec<String> = stream::iter(batch)
                    .map(|doc| self.read_document(doc))
                    .buffered(self.concurrency)
                    .try_collect()
                    .await?;
                for (doc, note) in batch.iter().zip(results) {
                    notes.push(doc.name.as_str(), note);
                }
                info!("Read {end}/{total} documents");

                if end == total {
                    Ok(Round1State::Synthesizing { notes })
                } else {
                    Ok(Round1State::Reading { next: end, notes })
                }
            }
            Round1State::Synthesizing { notes } => {
                let code_book = CodeBookSynthesizer::new(self.gateway, self.mode, self.context)
                    .with_hierarchy(self.hierarchy)
                    .synthesize(&notes)
                    .await?;
                Ok(Round1State::Done { code_book, notes })
            }
            done @ Round1State::Done { .. } => Ok(done),
        }
    }

    /// Run all transitions until `Done`.
    pub async fn run(&self) -> Result<Round1Outcome, CoderError> {
        let mut state = Round1State::start();
        loop {
            state = match self.step(state).await? {
                Round1State::Done { code_book, notes } => {
                    return Ok(Round1Outcome { code_book, notes });
                }
                next => next,
            };
        }
    }

    async fn read_document(&self, document: &Document) -> Result<String, CoderError> {
        debug!("Reading {document}");
        let prompt =
            prompts::read_document(self.mode, self.context, &document.name, &document.content);
        let draft: NotesDraft =
            generate_structured(self.gateway, Stage::ReadDocument, &document.name, prompt)
                .await
                .map_err(|source| CoderError::Llm {
                    stage: Stage::ReadDocument,
                    subject: document.name.clone(),
                    source,
                })?;
        Ok(draft.notes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmError;
    use crate::llm::mock::ScriptedGateway;
    use serde_json::{Value, json};
    use std::time::Duration;

    fn docs(names: &[&str]) -> Vec<Document> {
        names
            .iter()
            .map(|n| Document::new(*n, format!("Content of {n}.")).unwrap())
            .collect()
    }

    fn code_book_json() -> Value {
        json!({"codes": [
            {"name": "Price", "description": "Cost", "criteria": "Mentions cost"},
            {"name": "Support", "description": "Help desk", "criteria": "Mentions support"}
        ]})
    }

    fn scripted() -> ScriptedGateway {
        ScriptedGateway::new(|req| match req.stage {
            Stage::ReadDocument => Ok(json!({ "notes": format!("notes on {}", req.subject) })),
            Stage::CreateCodeBook => Ok(code_book_json()),
            other => panic!("unexpected stage {other}"),
        })
    }

    #[tokio::test]
    async fn test_step_transitions() {
        let gateway = scripted();
        let documents = docs(&["a.txt", "b.txt"]);
        let controller = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx");

        let state = controller.step(Round1State::start()).await.unwrap();
        let Round1State::Reading { next, notes } = &state else {
            panic!("expected Reading, got {state:?}");
        };
        assert_eq!(*next, 1);
        assert_eq!(notes.get("a.txt"), Some("notes on a.txt"));

        let state = controller.step(state).await.unwrap();
        assert!(matches!(state, Round1State::Synthesizing { ref notes } if notes.len() == 2));

        let state = controller.step(state).await.unwrap();
        assert!(state.is_done());
        assert_eq!(gateway.call_count(Stage::CreateCodeBook), 1);

        // Done is terminal.
        let again = controller.step(state.clone()).await.unwrap();
        assert_eq!(again, state);
        assert_eq!(gateway.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_synthesis_sees_all_notes_in_order() {
        let gateway = scripted();
        let documents = docs(&["a.txt", "b.txt", "c.txt"]);
        let outcome = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .run()
            .await
            .unwrap();

        assert_eq!(outcome.code_book.len(), 2);
        assert_eq!(outcome.code_book.context, "ctx");

        let calls = gateway.calls();
        let synth = calls
            .iter()
            .find(|r| r.stage == Stage::CreateCodeBook)
            .unwrap();
        let a = synth.user.find("Document a.txt:").unwrap();
        let b = synth.user.find("Document b.txt:").unwrap();
        let c = synth.user.find("Document c.txt:").unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn test_read_calls_see_only_their_document() {
        let gateway = scripted();
        let documents = docs(&["a.txt", "b.txt"]);
        Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .run()
            .await
            .unwrap();

        for call in gateway.calls().iter().filter(|r| r.stage == Stage::ReadDocument) {
            let other = if call.subject == "a.txt" { "b.txt" } else { "a.txt" };
            assert!(!call.user.contains(other));
        }
    }

    #[tokio::test]
    async fn test_concurrent_reading_keeps_input_order() {
        // First document answers last.
        let gateway = scripted().with_latency(|req| match req.subject.as_str() {
            "a.txt" => Duration::from_millis(60),
            "b.txt" => Duration::from_millis(30),
            _ => Duration::from_millis(1),
        });
        let documents = docs(&["a.txt", "b.txt", "c.txt"]);
        let outcome = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .with_concurrency(3)
            .run()
            .await
            .unwrap();

        let order: Vec<_> = outcome.notes.iter().map(|n| n.document.as_str()).collect();
        assert_eq!(order, vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(gateway.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_batch_failure_reports_earliest_document() {
        // Both reads fail; the later document fails first.
        let gateway = ScriptedGateway::new(|_| Err(LlmError::Transport("down".into())))
            .with_latency(|req| match req.subject.as_str() {
                "a.txt" => Duration::from_millis(80),
                _ => Duration::from_millis(1),
            });
        let documents = docs(&["a.txt", "b.txt"]);
        let err = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .with_concurrency(2)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoderError::Llm { stage: Stage::ReadDocument, ref subject, .. } if subject == "a.txt"
        ));
        assert_eq!(gateway.call_count(Stage::CreateCodeBook), 0);
    }

    #[tokio::test]
    async fn test_duplicate_code_names_rejected() {
        let gateway = ScriptedGateway::from_queue([
            json!({"notes": "n"}),
            json!({"codes": [
                {"name": "Price", "description": "d", "criteria": "c"},
                {"name": "Price", "description": "d2", "criteria": "c2"}
            ]}),
        ]);
        let documents = docs(&["a.txt"]);
        let err = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, CoderError::CodeBookValidation { ref name, .. } if name == "Price"));
    }

    #[tokio::test]
    async fn test_read_failure_names_document() {
        let gateway = ScriptedGateway::from_queue([json!({"wrong": true})]);
        let documents = docs(&["a.txt"]);
        let err = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoderError::Llm { stage: Stage::ReadDocument, ref subject, .. } if subject == "a.txt"
        ));
    }

    #[tokio::test]
    async fn test_hierarchical_code_book() {
        let gateway = ScriptedGateway::from_queue([
            json!({"notes": "n"}),
            json!({"codes": [
                {"name": "Pricing", "description": "d", "criteria": "c", "parent": null},
                {"name": "Too expensive", "description": "d", "criteria": "c", "parent": "Pricing"},
                {"name": "Discounts", "description": "d", "criteria": "c", "parent": " "}
            ]}),
        ]);
        let documents = docs(&["a.txt"]);
        let outcome = Round1Controller::new(&gateway, &documents, AnalysisMode::Coding, "ctx")
            .with_hierarchy(HierarchyDepth::TwoLevel)
            .run()
            .await
            .unwrap();

        let book = outcome.code_book;
        assert_eq!(book.hierarchy, HierarchyDepth::TwoLevel);
        assert_eq!(book.get_code("Too expensive").unwrap().parent.as_deref(), Some("Pricing"));
        assert!(book.get_code("Discounts").unwrap().parent.is_none());
    }
}
