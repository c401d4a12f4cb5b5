/// Chunk planning for coding mode.
///
/// The planner asks the model how to split a document into contiguous ranges
/// and which ranges are worth coding. A plan is accepted only if its ranges
/// partition `1..=N` exactly; anything else is rejected as a whole.
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{CoderError, PlanViolation};
use crate::llm::{LlmGateway, Stage, generate_structured};
use crate::model::{Chunk, CodeBook, Document, SentenceId};
use crate::prompts;

/// The model's chunking decision for one document.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ChunkingDecision {
    /// False to process the whole document as one chunk.
    pub should_chunk: bool,
    /// Ranges in any order; ignored when `should_chunk` is false.
    #[serde(default)]
    pub chunks: Vec<ChunkRange>,
}

/// Ids are read as signed integers so out-of-range values reach plan
/// validation instead of failing decoding.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ChunkRange {
    pub start_sentence_id: i64,
    pub end_sentence_id: i64,
    /// Whether the range is relevant for coding.
    pub should_code: bool,
    #[serde(default)]
    pub rationale: String,
}

/// A validated partition of a document into chunks, in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    document: String,
    sentence_count: usize,
    chunks: Vec<Chunk>,
}

impl ChunkPlan {
    /// Check that `chunks` partition `1..=sentence_count`.
    ///
    /// Ranges may arrive in any order and are stored sorted. Malformed ranges,
    /// overlaps and gaps are reported with the ranges involved; nothing is
    /// clipped or merged.
    pub fn validate(
        document: &str,
        sentence_count: usize,
        mut chunks: Vec<Chunk>,
    ) -> Result<Self, CoderError> {
        let reject = |violation| CoderError::ChunkPlanValidation {
            document: document.to_string(),
            violation,
        };

        if let Some(bad) = chunks
            .iter()
            .find(|c| c.start == 0 || c.start > c.end || c.end as usize > sentence_count)
        {
            return Err(reject(PlanViolation::Malformed {
                start: i64::from(bad.start),
                end: i64::from(bad.end),
                sentence_count,
            }));
        }

        if sentence_count == 0 {
            return Ok(Self {
                document: document.to_string(),
                sentence_count,
                chunks,
            });
        }
        if chunks.is_empty() {
            return Err(reject(PlanViolation::Empty { sentence_count }));
        }

        chunks.sort_by_key(|c| (c.start, c.end));

        let first = &chunks[0];
        if first.start > 1 {
            return Err(reject(PlanViolation::Gap {
                after: None,
                missing: (1, first.start - 1),
            }));
        }
        for pair in chunks.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if cur.start <= prev.end {
                return Err(reject(PlanViolation::Overlap {
                    first: prev.range(),
                    second: cur.range(),
                }));
            }
            if cur.start > prev.end + 1 {
                return Err(reject(PlanViolation::Gap {
                    after: Some(prev.range()),
                    missing: (prev.end + 1, cur.start - 1),
                }));
            }
        }
        let last = &chunks[chunks.len() - 1];
        if (last.end as usize) < sentence_count {
            return Err(reject(PlanViolation::Gap {
                after: Some(last.range()),
                missing: (last.end + 1, sentence_count as SentenceId),
            }));
        }

        Ok(Self {
            document: document.to_string(),
            sentence_count,
            chunks,
        })
    }

    /// The one-chunk plan: the whole document, marked relevant.
    pub fn whole(document: &Document, rationale: impl Into<String>) -> Result<Self, CoderError> {
        let chunks = match SentenceId::try_from(document.sentence_count()) {
            Ok(0) => Vec::new(),
            Ok(n) => vec![Chunk {
                document: document.name.clone(),
                start: 1,
                end: n,
                should_code: true,
                rationale: rationale.into(),
            }],
            Err(_) => {
                return Err(CoderError::Segmentation {
                    document: document.name.clone(),
                    reason: "too many sentences".to_string(),
                });
            }
        };
        Self::validate(&document.name, document.sentence_count(), chunks)
    }

    pub fn document(&self) -> &str {
        &self.document
    }

    pub fn sentence_count(&self) -> usize {
        self.sentence_count
    }

    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn relevant_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| c.should_code)
    }

    /// Sentences that fall into chunks marked irrelevant.
    pub fn skipped_sentences(&self) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.should_code)
            .map(Chunk::len)
            .sum()
    }
}

/// Convert a planner range, rejecting ids that are not valid sentence ids.
fn to_chunk(document: &Document, range: ChunkRange) -> Result<Chunk, CoderError> {
    let (Ok(start), Ok(end)) = (
        SentenceId::try_from(range.start_sentence_id),
        SentenceId::try_from(range.end_sentence_id),
    ) else {
        return Err(CoderError::ChunkPlanValidation {
            document: document.name.clone(),
            violation: PlanViolation::Malformed {
                start: range.start_sentence_id,
                end: range.end_sentence_id,
                sentence_count: document.sentence_count(),
            },
        });
    };
    Ok(Chunk {
        document: document.name.clone(),
        start,
        end,
        should_code: range.should_code,
        rationale: range.rationale,
    })
}

/// Asks the model for a chunk plan and validates it.
pub struct ChunkPlanner<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> ChunkPlanner<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// Plan one document. Empty documents get an empty plan without a call.
    pub async fn plan(
        &self,
        document: &Document,
        code_book: &CodeBook,
    ) -> Result<ChunkPlan, CoderError> {
        if document.is_empty() {
            debug!("{} has no sentences, nothing to plan", document.name);
            return ChunkPlan::validate(&document.name, 0, Vec::new());
        }

        let prompt = prompts::decide_chunking(&document.name, document.sentences(), code_book);
        let decision: ChunkingDecision =
            generate_structured(self.gateway, Stage::DecideChunking, &document.name, prompt)
                .await
                .map_err(|source| CoderError::Llm {
                    stage: Stage::DecideChunking,
                    subject: document.name.clone(),
                    source,
                })?;

        let plan = if decision.should_chunk {
            let chunks = decision
                .chunks
                .into_iter()
                .map(|r| to_chunk(document, r))
                .collect::<Result<Vec<_>, _>>()?;
            ChunkPlan::validate(&document.name, document.sentence_count(), chunks)?
        } else {
            ChunkPlan::whole(document, "processed as a whole")?
        };

        info!(
            "{}: {} chunks, {} relevant, {} of {} sentences skipped",
            document.name,
            plan.chunks().len(),
            plan.relevant_chunks().count(),
            plan.skipped_sentences(),
            plan.sentence_count()
        );
        Ok(plan)
    }
}
