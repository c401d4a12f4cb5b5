/// The two-round coding pipeline.
///
/// Round 1 ([`round1`]) reads documents and synthesizes a code book. Round 2
/// applies it either per sentence ([`chunking`] + [`coding`]) or per document
/// ([`categorize`]). [`orchestrator`] ties the rounds together.
pub mod categorize;
pub mod chunking;
pub mod coding;
pub mod orchestrator;
pub mod round1;

pub use categorize::CategorizationApplier;
pub use chunking::{ChunkPlan, ChunkPlanner};
pub use coding::{CodingApplier, DocumentCoder, DocumentCoding};
pub use orchestrator::WorkflowOrchestrator;
pub use round1::{CodeBookSynthesizer, Round1Controller, Round1Outcome, Round1State};
