/// Document-level categorization.
use std::collections::HashSet;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::error::CoderError;
use crate::llm::{LlmGateway, Stage, generate_structured};
use crate::model::{CodeBook, Document, DocumentCode};
use crate::prompts;

/// Codes the model applied to a whole document.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct DocumentCodesDraft {
    /// May be empty when no code fits.
    pub codes: Vec<DocumentCodeDraft>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DocumentCodeDraft {
    /// Exact name of a code from the code book.
    pub code_name: String,
    #[serde(default)]
    pub rationale: String,
}

/// Applies zero or more codes to a single document.
pub struct CategorizationApplier<'a> {
    gateway: &'a dyn LlmGateway,
}

impl<'a> CategorizationApplier<'a> {
    pub fn new(gateway: &'a dyn LlmGateway) -> Self {
        Self { gateway }
    }

    /// One call per document. Any unknown or repeated code name rejects the
    /// whole answer.
    pub async fn apply(
        &self,
        document: &Document,
        code_book: &CodeBook,
    ) -> Result<Vec<DocumentCode>, CoderError> {
        let prompt = prompts::categorize_document(&document.name, &document.content, code_book);
        let draft: DocumentCodesDraft =
            generate_structured(self.gateway, Stage::CategorizeDocument, &document.name, prompt)
                .await
                .map_err(|source| CoderError::Llm {
                    stage: Stage::CategorizeDocument,
                    subject: document.name.clone(),
                    source,
                })?;

        let reject = |reason: String| CoderError::CodeReference {
            document: document.name.clone(),
            range: None,
            reason,
        };

        let mut seen = HashSet::new();
        let mut codes = Vec::with_capacity(draft.codes.len());
        for entry in draft.codes {
            if !code_book.contains(&entry.code_name) {
                return Err(reject(format!("unknown code {:?}", entry.code_name)));
            }
            if !seen.insert(entry.code_name.clone()) {
                return Err(reject(format!("code {:?} applied twice", entry.code_name)));
            }
            codes.push(DocumentCode {
                document_name: document.name.clone(),
                code_name: entry.code_name,
                rationale: entry.rationale,
            });
        }

        info!("{}: {} codes", document.name, codes.len());
        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedGateway;
    use crate::model::{AnalysisMode, Code};
    use serde_json::json;

    fn book() -> CodeBook {
        CodeBook::new(
            AnalysisMode::Categorization,
            "What are the reviews about?",
            vec![
                Code::new("Delivery", "Shipping", "Mentions delivery"),
                Code::new("Quality", "Product quality", "Mentions quality"),
            ],
        )
    }

    #[tokio::test]
    async fn test_applies_codes() {
        let gateway = ScriptedGateway::from_queue([json!({"codes": [
            {"code_name": "Quality", "rationale": "talks about build"},
            {"code_name": "Delivery"}
        ]})]);
        let doc = Document::new("r1.txt", "Arrived late. Solid build.").unwrap();
        let codes = CategorizationApplier::new(&gateway)
            .apply(&doc, &book())
            .await
            .unwrap();
        assert_eq!(codes.len(), 2);
        assert_eq!(codes[0].code_name, "Quality");
        assert_eq!(codes[0].rationale, "talks about build");
        assert!(codes.iter().all(|c| c.document_name == "r1.txt"));

        let call = &gateway.calls()[0];
        assert_eq!(call.stage, Stage::CategorizeDocument);
        assert!(call.user.contains("What are the reviews about?"));
        assert!(call.user.contains("Arrived late. Solid build."));
    }

    #[tokio::test]
    async fn test_no_codes_is_fine() {
        let gateway = ScriptedGateway::from_queue([json!({"codes": []})]);
        let doc = Document::new("r2.txt", "Nothing to say.").unwrap();
        let codes = CategorizationApplier::new(&gateway)
            .apply(&doc, &book())
            .await
            .unwrap();
        assert!(codes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_code_rejects_document() {
        let gateway = ScriptedGateway::from_queue([json!({"codes": [
            {"code_name": "Quality"},
            {"code_name": "Price"}
        ]})]);
        let doc = Document::new("r3.txt", "Too pricey.").unwrap();
        let err = CategorizationApplier::new(&gateway)
            .apply(&doc, &book())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoderError::CodeReference { ref document, range: None, .. } if document == "r3.txt"
        ));
    }

    #[tokio::test]
    async fn test_repeated_code_rejects_document() {
        let gateway = ScriptedGateway::from_queue([json!({"codes": [
            {"code_name": "Quality"},
            {"code_name": "Quality"}
        ]})]);
        let doc = Document::new("r4.txt", "Good. Really good.").unwrap();
        assert!(
            CategorizationApplier::new(&gateway)
                .apply(&doc, &book())
                .await
                .is_err()
        );
    }
}
