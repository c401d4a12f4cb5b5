/// Sentence-level coding of relevant chunks.
///
/// [`CodingApplier`] handles one chunk; [`DocumentCoder`] walks a document
/// through planning and its chunks as an explicit state machine.
use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CoderError, PlanViolation};
use crate::llm::{LlmGateway, Stage, generate_structured};
use crate::model::{Chunk, CodeBook, Document, SentenceCode, SentenceId};
use crate::prompts;
use crate::workflow::chunking::{ChunkPlan, ChunkPlanner};

/// Codes the model applied to sentences of one chunk.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SentenceCodesDraft {
    pub codes: Vec<SentenceCodeDraft>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SentenceCodeDraft {
    pub sentence_id: SentenceId,
    /// Exact name of a code from the code book.
    pub code_name: String,
    #[serde(default)]
    pub rationale: String,
}

/// Applies codes to the sentences of a single chunk.
pub struct CodingApplier<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> CodingApplier<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// Code one chunk. Irrelevant chunks return nothing and make no call.
    ///
    /// Output is rejected as a whole if any entry cites a sentence outside the
    /// chunk, an unknown code, or repeats a (sentence, code) pair.
    pub async fn apply(
        &self,
        document: &Document,
        chunk: &Chunk,
        code_book: &CodeBook,
    ) -> Result<Vec<SentenceCode>, CoderError> {
        if !chunk.should_code {
            debug!("Skipping {chunk}");
            return Ok(Vec::new());
        }

        if chunk.start == 0
            || chunk.start > chunk.end
            || chunk.end as usize > document.sentence_count()
        {
            return Err(CoderError::ChunkPlanValidation {
                document: document.name.clone(),
                violation: PlanViolation::Malformed {
                    start: i64::from(chunk.start),
                    end: i64::from(chunk.end),
                    sentence_count: document.sentence_count(),
                },
            });
        }
        let sentences = document.sentences_in(chunk.start, chunk.end);

        let subject = format!("{} [{}-{}]", document.name, chunk.start, chunk.end);
        let prompt = prompts::code_chunk(&document.name, sentences, code_book);
        let draft: SentenceCodesDraft =
            generate_structured(self.gateway, Stage::CodeChunk, &subject, prompt)
                .await
                .map_err(|source| CoderError::Llm {
                    stage: Stage::CodeChunk,
                    subject: subject.clone(),
                    source,
                })?;

        let reject = |reason: String| CoderError::CodeReference {
            document: document.name.clone(),
            range: Some(chunk.range()),
            reason,
        };

        let mut seen = HashSet::new();
        let mut codes = Vec::with_capacity(draft.codes.len());
        for entry in draft.codes {
            if !chunk.contains(entry.sentence_id) {
                return Err(reject(format!(
                    "sentence {} is outside the chunk",
                    entry.sentence_id
                )));
            }
            if !code_book.contains(&entry.code_name) {
                return Err(reject(format!("unknown code {:?}", entry.code_name)));
            }
            if !seen.insert((entry.sentence_id, entry.code_name.clone())) {
                return Err(reject(format!(
                    "code {:?} applied twice to sentence {}",
                    entry.code_name, entry.sentence_id
                )));
            }
            codes.push(SentenceCode {
                document_name: document.name.clone(),
                sentence_id: entry.sentence_id,
                code_name: entry.code_name,
                rationale: entry.rationale,
            });
        }

        codes.sort_by_key(|c| c.sentence_id);
        debug!("{chunk}: {} codes", codes.len());
        Ok(codes)
    }
}

// ── Per-document state machine ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentCoding {
    Planning,
    /// Chunks before `next` are coded; their codes are in `codes`.
    Coding {
        plan: ChunkPlan,
        next: usize,
        codes: Vec<SentenceCode>,
    },
    Done { codes: Vec<SentenceCode> },
}

impl DocumentCoding {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}

/// Plans a document, then codes its chunks one after another in ascending
/// range order.
pub struct DocumentCoder<'a> {
    planner: ChunkPlanner<'a>,
    applier: CodingApplier<'a>,
    document: &'a Document,
    code_book: &'a CodeBook,
}

impl<'a> DocumentCoder<'a> {
    pub fn new(
        gateway: &'a dyn LlmGateway,
        document: &'a Document,
        code_book: &'a CodeBook,
    ) -> Self {
        Self {
            planner: ChunkPlanner::new(gateway),
            applier: CodingApplier::new(gateway),
            document,
            code_book,
        }
    }

    pub async fn step(&self, state: DocumentCoding) -> Result<DocumentCoding, CoderError> {
        match state {
            DocumentCoding::Planning => {
                let plan = self.planner.plan(self.document, self.code_book).await?;
                if plan.chunks().is_empty() {
                    return Ok(DocumentCoding::Done { codes: Vec::new() });
                }
                Ok(DocumentCoding::Coding {
                    plan,
                    next: 0,
                    codes: Vec::new(),
                })
            }
            DocumentCoding::Coding {
                plan,
                next,
                mut codes,
            } => {
                let Some(chunk) = plan.chunks().get(next) else {
                    return Ok(DocumentCoding::Done { codes });
                };
                codes.extend(
                    self.applier
                        .apply(self.document, chunk, self.code_book)
                        .await?,
                );
                if next + 1 == plan.chunks().len() {
                    Ok(DocumentCoding::Done { codes })
                } else {
                    Ok(DocumentCoding::Coding {
                        plan,
                        next: next + 1,
                        codes,
                    })
                }
            }
            done @ DocumentCoding::Done { .. } => Ok(done),
        }
    }

    pub async fn run(&self) -> Result<Vec<SentenceCode>, CoderError> {
        let mut state = DocumentCoding::Planning;
        loop {
            state = match self.step(state).await? {
                DocumentCoding::Done { codes } => {
                    info!("{}: {} sentence codes", self.document.name, codes.len());
                    return Ok(codes);
                }
                next => next,
            };
        }
    }
}
