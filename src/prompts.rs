/// System/user prompt builders for each pipeline stage.
use crate::model::{AnalysisMode, CodeBook, HierarchyDepth, Sentence};

/// Research context used when the user supplies none.
pub const DEFAULT_CONTEXT: &str = "Analyze the documents and identify key themes and patterns.";

/// Skeleton for a user's research context file.
pub const CONTEXT_TEMPLATE: &str = "\
# Inductive Coding Prompt Template

## Research Question

[Describe your research question or the purpose of your analysis here]

## Context

[Provide any relevant context about the documents you're analyzing, such as:
- What type of documents they are (interviews, survey responses, field notes, etc.)
- The domain or topic area
- Any specific aspects you're interested in exploring]

## Focus Areas

[Optional: List specific themes, concepts, or aspects you want to pay attention to]

1.
2.
3.

## Additional Instructions

[Optional: Any other guidance for the coding process]
";

/// A system prompt and a user prompt for one call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Render the code book as a bulleted list.
///
/// Child codes name their parent so later stages see the hierarchy.
pub fn format_code_list(code_book: &CodeBook) -> String {
    code_book
        .codes
        .iter()
        .map(|code| {
            let parent = code
                .parent
                .as_deref()
                .map(|p| format!(" (under {p})"))
                .unwrap_or_default();
            format!(
                "- {}{parent}: {}\n  Criteria: {}",
                code.name, code.description, code.criteria
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// One sentence per line, prefixed with its id.
pub fn format_sentences(sentences: &[Sentence]) -> String {
    sentences
        .iter()
        .map(|s| format!("{}: {}", s.id, s.text))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn read_document(mode: AnalysisMode, context: &str, name: &str, content: &str) -> Prompt {
    let system = format!(
        "You are analyzing documents for inductive {mode}.\n\n\
         Read the document carefully and take notes about:\n\
         1. Key themes, patterns, or categories that emerge\n\
         2. Important concepts or ideas relevant to the research question\n\
         3. Potential codes that could be used to categorize this content\n\n\
         Write clear, structured notes. They are the only memory of this \
         document available when the code book is created later."
    );
    let user = format!(
        "Research question and context:\n{context}\n\n\
         Document to analyze: {name}\n\n\
         Content:\n{content}"
    );
    Prompt { system, user }
}

pub fn create_code_book(
    mode: AnalysisMode,
    context: &str,
    notes: &str,
    hierarchy: HierarchyDepth,
) -> Prompt {
    let structure = match hierarchy {
        HierarchyDepth::Flat => "Keep the code book flat: leave `parent` empty for every code.",
        HierarchyDepth::TwoLevel => {
            "Organize codes in at most two levels: top-level codes have no \
             `parent`, sub-codes name a top-level code as `parent`."
        }
        HierarchyDepth::Arbitrary => {
            "Organize codes hierarchically as deep as the data warrants; each \
             sub-code names its `parent` code."
        }
    };
    let system = format!(
        "You are creating a code book for inductive {mode} analysis.\n\n\
         Create codes that:\n\
         1. Capture the key themes, patterns, and categories in the data\n\
         2. Are relevant to the user's research question\n\
         3. Have clear criteria for when to apply each code\n\
         4. Are mutually exclusive where possible but can overlap when necessary\n\n\
         Every code needs a unique name, a description and criteria. \
         {structure}\n\n\
         Provide 5-10 codes that will be most useful for analyzing this data."
    );
    let user = format!(
        "Research question and context:\n{context}\n\n\
         Your notes from reading all documents:\n{notes}"
    );
    Prompt { system, user }
}

pub fn decide_chunking(name: &str, sentences: &[Sentence], code_book: &CodeBook) -> Prompt {
    let system = "You are analyzing a document for coding.\n\n\
         Decide whether to:\n\
         1. Process the entire document at once (if it is short or highly cohesive)\n\
         2. Divide it into chunks (if it is long or covers multiple topics)\n\n\
         If chunking, give the start and end sentence id of each chunk and \
         whether it is relevant for coding with this code book. Chunks must \
         cover every sentence exactly once, in order, without gaps or overlaps. \
         Irrelevant chunks are skipped entirely."
        .to_string();
    let user = format!(
        "Code book:\n{}\n\nDocument: {name}\n\nSentences:\n{}",
        format_code_list(code_book),
        format_sentences(sentences)
    );
    Prompt { system, user }
}

pub fn code_chunk(name: &str, sentences: &[Sentence], code_book: &CodeBook) -> Prompt {
    let system = "Apply codes to the sentences of this chunk.\n\n\
         For each sentence that matches one or more codes:\n\
         1. Identify the sentence id\n\
         2. Apply the matching code(s) by exact name\n\
         3. Provide a brief rationale\n\n\
         Only use sentence ids listed below and code names from the code book. \
         Sentences that match no code are simply left out."
        .to_string();
    let user = format!(
        "Code book:\n{}\n\nDocument: {name}\n\nSentences to code:\n{}",
        format_code_list(code_book),
        format_sentences(sentences)
    );
    Prompt { system, user }
}

pub fn categorize_document(name: &str, content: &str, code_book: &CodeBook) -> Prompt {
    let system = "Categorize this document using the code book.\n\n\
         Apply every relevant code, possibly none or several, by exact name. \
         For each code applied, provide a brief rationale."
        .to_string();
    let user = format!(
        "Research context:\n{}\n\nCode book:\n{}\n\nDocument: {name}\n\nContent:\n{content}",
        code_book.context,
        format_code_list(code_book)
    );
    Prompt { system, user }
}
