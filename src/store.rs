/// Filesystem boundary: reading documents, persisting code books and results.
///
/// An output directory holds `analysis.json` (the full result),
/// `code_book.json`, a human-readable `summary.txt` and `codes.csv`.
use std::fs;
use std::io;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::CoderError;
use crate::model::{AnalysisMode, AnalysisResult, AppliedCodes, CodeBook, Document, SentenceId};
use crate::segmenter;

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const CODE_BOOK_FILE: &str = "code_book.json";
pub const SUMMARY_FILE: &str = "summary.txt";
pub const CODES_CSV_FILE: &str = "codes.csv";

// ── Documents ────────────────────────────────────────────────────────

/// Load every file in `dir` (not recursive) whose extension is in
/// `extensions`, compared case-insensitively. Ordered by file name.
pub fn load_documents(dir: &Path, extensions: &[String]) -> Result<Vec<Document>, CoderError> {
    if !dir.is_dir() {
        return Err(CoderError::persistence(
            dir,
            io::Error::new(io::ErrorKind::NotFound, "not a directory"),
        ));
    }

    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let entries = glob::glob(&pattern)
        .map_err(|e| CoderError::persistence(dir, io::Error::new(io::ErrorKind::InvalidInput, e)))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| CoderError::persistence(dir, e.into_error()))?;
        if path.is_file() && has_extension(&path, extensions) {
            paths.push(path);
        }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let documents = paths
        .iter()
        .map(|path| load_document(path))
        .collect::<Result<Vec<_>, _>>()?;
    info!("Loaded {} documents from {}", documents.len(), dir.display());
    Ok(documents)
}

/// Load and segment a single file. The document is named after the file.
pub fn load_document(path: &Path) -> Result<Document, CoderError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    let bytes = fs::read(path).map_err(|e| CoderError::persistence(path, e))?;
    let content = segmenter::decode_text(&name, bytes)?;
    let document = Document::new(name, content)?;
    debug!("Loaded {document}");
    Ok(document)
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|want| want.trim_start_matches('.').eq_ignore_ascii_case(ext))
        })
}

// ── Code books ───────────────────────────────────────────────────────

pub fn save_code_book(code_book: &CodeBook, path: &Path) -> Result<(), CoderError> {
    write_json(code_book, path)?;
    info!("Saved code book to {}", path.display());
    Ok(())
}

/// Read a code book and validate it.
pub fn load_code_book(path: &Path) -> Result<CodeBook, CoderError> {
    let data = fs::read_to_string(path).map_err(|e| CoderError::persistence(path, e))?;
    let code_book: CodeBook = serde_json::from_str(&data).map_err(|e| CoderError::persistence(path, e))?;
    code_book.validate()?;
    info!("Loaded {code_book} from {}", path.display());
    Ok(code_book)
}

// ── Results ──────────────────────────────────────────────────────────

/// Write all result files into `dir`, creating it if needed.
pub fn save_result(result: &AnalysisResult, dir: &Path) -> Result<(), CoderError> {
    fs::create_dir_all(dir).map_err(|e| CoderError::persistence(dir, e))?;

    write_json(result, &dir.join(ANALYSIS_FILE))?;
    write_json(&result.code_book, &dir.join(CODE_BOOK_FILE))?;

    let summary_path = dir.join(SUMMARY_FILE);
    fs::write(&summary_path, render_summary(result))
        .map_err(|e| CoderError::persistence(&summary_path, e))?;

    write_codes_csv(result, &dir.join(CODES_CSV_FILE))?;

    info!("Saved results to {}", dir.display());
    Ok(())
}

/// Read `analysis.json` from `dir` and re-check its code references.
pub fn load_result(dir: &Path) -> Result<AnalysisResult, CoderError> {
    let path = dir.join(ANALYSIS_FILE);
    let data = fs::read_to_string(&path).map_err(|e| CoderError::persistence(&path, e))?;
    let result: AnalysisResult =
        serde_json::from_str(&data).map_err(|e| CoderError::persistence(&path, e))?;
    result.code_book.validate()?;
    result.check_code_references()?;
    Ok(result)
}

/// Plain-text report of a result.
pub fn render_summary(result: &AnalysisResult) -> String {
    let book = &result.code_book;
    let mut out = String::new();
    out.push_str("Inductive Coding Summary\n");
    out.push_str(&format!(
        "Generated: {}\n",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    out.push_str(&format!("Mode: {}\n", result.mode));
    if !book.context.is_empty() {
        out.push_str(&format!("Context: {}\n", book.context));
    }

    out.push_str(&format!("\nCode book ({} codes):\n", book.len()));
    for code in &book.codes {
        match &code.parent {
            Some(parent) => out.push_str(&format!("- {} (under {parent})\n", code.name)),
            None => out.push_str(&format!("- {}\n", code.name)),
        }
        out.push_str(&format!("  Description: {}\n", code.description));
        out.push_str(&format!("  Criteria: {}\n", code.criteria));
    }

    let unit = match result.mode {
        AnalysisMode::Coding => "sentence codes",
        AnalysisMode::Categorization => "document codes",
    };
    out.push_str(&format!("\nTotal {unit}: {}\n", result.codes.len()));
    out.push_str(&format!(
        "Documents with codes: {}\n",
        result.coded_document_count()
    ));

    let counts = result.code_counts();
    out.push_str("\nCode frequency:\n");
    for code in &book.codes {
        let n = counts.get(code.name.as_str()).copied().unwrap_or(0);
        out.push_str(&format!("- {}: {n}\n", code.name));
    }
    out
}

#[derive(Serialize)]
struct SentenceRow<'a> {
    document: &'a str,
    sentence_id: SentenceId,
    code: &'a str,
    rationale: &'a str,
}

#[derive(Serialize)]
struct DocumentRow<'a> {
    document: &'a str,
    code: &'a str,
    rationale: &'a str,
}

/// One CSV row per applied code.
pub fn write_codes_csv(result: &AnalysisResult, path: &Path) -> Result<(), CoderError> {
    let err = |e: csv::Error| CoderError::persistence(path, e);
    let mut writer = csv::Writer::from_path(path).map_err(err)?;
    match &result.codes {
        AppliedCodes::SentenceCodes(codes) => {
            for sc in codes {
                writer
                    .serialize(SentenceRow {
                        document: &sc.document_name,
                        sentence_id: sc.sentence_id,
                        code: &sc.code_name,
                        rationale: &sc.rationale,
                    })
                    .map_err(err)?;
            }
        }
        AppliedCodes::DocumentCodes(codes) => {
            for dc in codes {
                writer
                    .serialize(DocumentRow {
                        document: &dc.document_name,
                        code: &dc.code_name,
                        rationale: &dc.rationale,
                    })
                    .map_err(err)?;
            }
        }
    }
    writer
        .flush()
        .map_err(|e| CoderError::persistence(path, e))
}

fn write_json<T: Serialize>(value: &T, path: &Path) -> Result<(), CoderError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CoderError::persistence(parent, e))?;
    }
    let mut data = serde_json::to_string_pretty(value).map_err(|e| CoderError::persistence(path, e))?;
    data.push('\n');
    fs::write(path, data).map_err(|e| CoderError::persistence(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Code, DocumentCode, DocumentNotes, SentenceCode};
    use tempfile::tempdir;

    fn book(mode: AnalysisMode) -> CodeBook {
        CodeBook::new(
            mode,
            "How do users feel?",
            vec![
                Code::new("Positive", "Positive sentiment", "Mentions satisfaction"),
                Code::new("Negative", "Negative sentiment", "Mentions problems"),
            ],
        )
    }

    fn coding_result() -> AnalysisResult {
        let mut notes = DocumentNotes::new();
        notes.push("a.txt", "mostly happy");
        AnalysisResult {
            mode: AnalysisMode::Coding,
            code_book: book(AnalysisMode::Coding),
            codes: AppliedCodes::SentenceCodes(vec![
                SentenceCode {
                    document_name: "a.txt".into(),
                    sentence_id: 1,
                    code_name: "Positive".into(),
                    rationale: "likes it, a lot".into(),
                },
                SentenceCode {
                    document_name: "a.txt".into(),
                    sentence_id: 2,
                    code_name: "Positive".into(),
                    rationale: String::new(),
                },
            ]),
            notes: Some(notes),
        }
    }

    #[test]
    fn test_load_documents_filters_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.md"), "Second file.").unwrap();
        fs::write(dir.path().join("a.TXT"), "First file. Two sentences.").unwrap();
        fs::write(dir.path().join("c.pdf"), "ignored").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("d.txt"), "not loaded").unwrap();

        let exts = vec!["txt".to_string(), ".md".to_string()];
        let docs = load_documents(dir.path(), &exts).unwrap();
        let names: Vec<_> = docs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a.TXT", "b.md"]);
        assert_eq!(docs[0].sentence_count(), 2);
    }

    #[test]
    fn test_load_documents_missing_dir() {
        let dir = tempdir().unwrap();
        let err = load_documents(&dir.path().join("nope"), &["txt".to_string()]).unwrap_err();
        assert!(matches!(err, CoderError::Persistence { .. }));
    }

    #[test]
    fn test_invalid_utf8_is_segmentation_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("bad.txt"), [0xffu8, 0xfe, 0x00]).unwrap();
        let err = load_documents(dir.path(), &["txt".to_string()]).unwrap_err();
        assert!(matches!(err, CoderError::Segmentation { ref document, .. } if document == "bad.txt"));
    }

    #[test]
    fn test_code_book_round_trip_keeps_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("books").join("code_book.json");
        let original = book(AnalysisMode::Categorization);
        save_code_book(&original, &path).unwrap();

        let loaded = load_code_book(&path).unwrap();
        assert_eq!(loaded, original);

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["mode"], "categorization");
        assert_eq!(raw["codes"][0]["name"], "Positive");
        assert!(raw["codes"][0].get("parent").is_none());
        assert!(raw.get("hierarchy").is_none());
    }

    #[test]
    fn test_load_code_book_validates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.json");
        fs::write(
            &path,
            r#"{"mode": "coding", "context": "", "codes": [
                {"name": "A", "description": "d", "criteria": "c"},
                {"name": "A", "description": "d", "criteria": "c"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            load_code_book(&path),
            Err(CoderError::CodeBookValidation { .. })
        ));

        fs::write(&path, "not json").unwrap();
        assert!(matches!(load_code_book(&path), Err(CoderError::Persistence { .. })));
    }

    #[test]
    fn test_save_and_load_result() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("output");
        let result = coding_result();
        save_result(&result, &out).unwrap();

        for name in [ANALYSIS_FILE, CODE_BOOK_FILE, SUMMARY_FILE, CODES_CSV_FILE] {
            assert!(out.join(name).exists(), "{name} missing");
        }
        assert_eq!(load_result(&out).unwrap(), result);

        let csv = fs::read_to_string(out.join(CODES_CSV_FILE)).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("document,sentence_id,code,rationale"));
        assert_eq!(lines.next(), Some("a.txt,1,Positive,\"likes it, a lot\""));
    }

    #[test]
    fn test_load_result_rejects_unknown_code() {
        let dir = tempdir().unwrap();
        let mut result = coding_result();
        if let AppliedCodes::SentenceCodes(codes) = &mut result.codes {
            codes[0].code_name = "Neutral".into();
        }
        let data = serde_json::to_string(&result).unwrap();
        fs::write(dir.path().join(ANALYSIS_FILE), data).unwrap();
        assert!(matches!(
            load_result(dir.path()),
            Err(CoderError::CodeReference { .. })
        ));
    }

    #[test]
    fn test_summary_counts() {
        let result = AnalysisResult {
            mode: AnalysisMode::Categorization,
            code_book: book(AnalysisMode::Categorization),
            codes: AppliedCodes::DocumentCodes(vec![
                DocumentCode {
                    document_name: "r1.txt".into(),
                    code_name: "Negative".into(),
                    rationale: String::new(),
                },
                DocumentCode {
                    document_name: "r2.txt".into(),
                    code_name: "Negative".into(),
                    rationale: String::new(),
                },
            ]),
            notes: None,
        };
        let summary = render_summary(&result);
        assert!(summary.contains("Mode: categorization"));
        assert!(summary.contains("Total document codes: 2"));
        assert!(summary.contains("Documents with codes: 2"));
        assert!(summary.contains("- Negative: 2"));
        assert!(summary.contains("- Positive: 0"));
        assert!(summary.contains("  Criteria: Mentions problems"));
    }
}
