//! # inductive-coder: LLM-assisted inductive coding
//!
//! Derives a code book from a set of text documents and applies it either to
//! individual sentences (coding) or to whole documents (categorization), with
//! a text-generation service doing the reading and labelling.
//!
//! ## Architecture
//!
//! - **[`model`]**: Documents, sentences, codes, code books, chunks and results
//! - **[`segmenter`]**: Sentence splitting with stable 1-based ids
//! - **[`llm`]**: Gateway trait, schema-checked calls, OpenAI client and scripted mock
//! - **[`prompts`]**: Prompt builders for the five pipeline stages
//! - **[`workflow`]**: Round 1 (notes → code book) and Round 2 (chunk planning, coding, categorization)
//! - **[`store`]**: Document loading, code book and result persistence, summary and CSV export
//! - **[`config`]**: JSON configuration with environment overrides
//! - **[`logging`]**: Tracing subscriber (stderr + per-run log file)

pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod model;
pub mod prompts;
pub mod segmenter;
pub mod store;
pub mod workflow;

pub use error::{CoderError, PlanViolation};
