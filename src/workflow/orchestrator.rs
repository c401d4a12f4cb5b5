/// Drives a full run: Round 1 (unless a code book is supplied), then Round 2
/// in coding or categorization mode.
///
/// Documents may be processed concurrently, but results are always joined in
/// input order, so the output never depends on which call finished first.
use std::sync::Arc;

use futures_util::stream::{self, StreamExt, TryStreamExt};
use tracing::info;

use crate::error::CoderError;
use crate::llm::LlmGateway;
use crate::model::{AnalysisMode, AnalysisResult, AppliedCodes, CodeBook, Document, HierarchyDepth};
use crate::workflow::categorize::CategorizationApplier;
use crate::workflow::coding::DocumentCoder;
use crate::workflow::round1::{Round1Controller, Round1Outcome};

pub struct WorkflowOrchestrator {
    gateway: Arc<dyn LlmGateway>,
    concurrency: usize,
    hierarchy: HierarchyDepth,
}

impl WorkflowOrchestrator {
    pub fn new(gateway: Arc<dyn LlmGateway>) -> Self {
        Self {
            gateway,
            concurrency: 1,
            hierarchy: HierarchyDepth::Flat,
        }
    }

    /// Number of documents in flight at once (at least 1).
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_hierarchy(mut self, hierarchy: HierarchyDepth) -> Self {
        self.hierarchy = hierarchy;
        self
    }

    /// Round 1 only: notes per document and the synthesized code book.
    pub async fn run_round1(
        &self,
        documents: &[Document],
        mode: AnalysisMode,
        context: &str,
    ) -> Result<Round1Outcome, CoderError> {
        info!("Round 1: reading {} documents ({mode})", documents.len());
        Round1Controller::new(self.gateway.as_ref(), documents, mode, context)
            .with_hierarchy(self.hierarchy)
            .with_concurrency(self.concurrency)
            .run()
            .await
    }

    /// Round 2 in coding mode: plan and code each document.
    pub async fn run_round2_coding(
        &self,
        documents: &[Document],
        code_book: &CodeBook,
    ) -> Result<AnalysisResult, CoderError> {
        check_code_book(code_book, AnalysisMode::Coding)?;
        info!("Round 2: coding {} documents", documents.len());

        let gateway = self.gateway.as_ref();
        let per_document: Vec<_> = stream::iter(documents)
            .map(|document| async move {
                DocumentCoder::new(gateway, document, code_book).run().await
            })
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let codes = per_document.into_iter().flatten().collect();
        finish(
            documents,
            code_book,
            AnalysisMode::Coding,
            AppliedCodes::SentenceCodes(codes),
        )
    }

    /// Round 2 in categorization mode: one call per document.
    pub async fn run_round2_categorization(
        &self,
        documents: &[Document],
        code_book: &CodeBook,
    ) -> Result<AnalysisResult, CoderError> {
        check_code_book(code_book, AnalysisMode::Categorization)?;
        info!("Round 2: categorizing {} documents", documents.len());

        let applier = CategorizationApplier::new(self.gateway.as_ref());
        let applier = &applier;
        let per_document: Vec<_> = stream::iter(documents)
            .map(|document| applier.apply(document, code_book))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        let codes = per_document.into_iter().flatten().collect();
        finish(
            documents,
            code_book,
            AnalysisMode::Categorization,
            AppliedCodes::DocumentCodes(codes),
        )
    }

    /// Full run. With `code_book` given, Round 1 is skipped and the result
    /// carries no notes.
    pub async fn run(
        &self,
        documents: &[Document],
        mode: AnalysisMode,
        context: &str,
        code_book: Option<CodeBook>,
    ) -> Result<AnalysisResult, CoderError> {
        let (code_book, notes) = match code_book {
            Some(book) => {
                info!("Using supplied {book}, skipping Round 1");
                check_code_book(&book, mode)?;
                (book, None)
            }
            None => {
                let outcome = self.run_round1(documents, mode, context).await?;
                (outcome.code_book, Some(outcome.notes))
            }
        };

        let mut result = match mode {
            AnalysisMode::Coding => self.run_round2_coding(documents, &code_book).await?,
            AnalysisMode::Categorization => {
                self.run_round2_categorization(documents, &code_book).await?
            }
        };
        result.notes = notes;
        info!("Finished: {result}");
        Ok(result)
    }
}

fn check_code_book(code_book: &CodeBook, mode: AnalysisMode) -> Result<(), CoderError> {
    if code_book.mode != mode {
        return Err(CoderError::ModeMismatch {
            expected: mode,
            found: code_book.mode,
        });
    }
    code_book.validate()
}

fn finish(
    documents: &[Document],
    code_book: &CodeBook,
    mode: AnalysisMode,
    codes: AppliedCodes,
) -> Result<AnalysisResult, CoderError> {
    let result = AnalysisResult {
        mode,
        code_book: code_book.clone(),
        codes,
        notes: None,
    };
    result.verify(documents)?;
    Ok(result)
}
