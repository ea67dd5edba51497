//! Build-output parsing and failure classification.
//!
//! Converts raw build-tool output into structured [`BuildError`] records.
//! The grammar is two small data-driven tables: block regexes that find
//! diagnostic boundaries, and an ordered `(pattern, category)` table that
//! assigns each block a category, evaluated top-to-bottom.
//!
//! Parsing never fails: malformed input yields zero records, and the
//! orchestrator wraps a nonzero exit with zero records into a single
//! `unknown` error so failed attempts always carry at least one.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use tracing::debug;

use crate::domain::diagnostic::{BuildError, ErrorCategory};

/// Substrings that mark a real failure even when the exit code is zero.
/// Some build-tool versions return 0 while individual nodes errored.
const ERROR_INDICATORS: &[&str] = &[
    "ERROR loading seed",
    "Database Error in",
    "Compilation Error in",
    "Runtime Error in",
    "Failure in test",
    "Failure in seed",
    "Parsing Error",
    "Validation Error",
];

/// Parser for build-tool diagnostic output.
pub struct BuildOutputParser {
    /// `<Kind> Error in <unit> <name> (<path>)` header blocks.
    header_block: Regex,
    /// `Failure in test|seed <name> (<path>)` blocks.
    failure_block: Regex,
    /// Project/schema-file parse failures without a unit header.
    schema_block: Regex,
    /// `N of M ERROR|FAIL <name>` result lines.
    result_line: Regex,
    /// Summary lines that indicate failure regardless of exit code.
    summary_error: Regex,
    /// Ordered `(pattern, category)` classification table.
    category_table: Vec<(Regex, ErrorCategory)>,
}

impl Default for BuildOutputParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildOutputParser {
    /// Compile the diagnostic grammar.
    pub fn new() -> Self {
        let category_table = vec![
            (r"Compilation Error", ErrorCategory::Compile),
            (
                r"(?i)Parsing Error|Validation Error|syntax error|invalid yaml|could not parse",
                ErrorCategory::Syntax,
            ),
            (
                r"Failure in test|Failure in seed|\bFAIL\b|(?i)assertion",
                ErrorCategory::TestFailure,
            ),
            (
                r"(?i)not found|does not exist|depends on a node|invalid identifier|unknown column|ambiguous column|unresolved ref",
                ErrorCategory::ReferenceError,
            ),
            (
                r"(?i)permission denied|not authorized|unauthorized|access denied|insufficient privileges|authentication failed",
                ErrorCategory::Permission,
            ),
            (
                r"(?i)connection|timed out|timeout|refused|could not connect|network is unreachable",
                ErrorCategory::Connection,
            ),
        ]
        .into_iter()
        .map(|(pattern, category)| (Regex::new(pattern).expect("static category pattern"), category))
        .collect();

        Self {
            header_block: Regex::new(
                r"(?s)(Compilation Error|Database Error|Runtime Error|Parsing Error|Validation Error) in (model|test|seed|snapshot|macro|operation) (\S+) \(([^)]+)\)\s*\n(.*?)(?:\n\s*\n|\z)",
            )
            .expect("static header-block pattern"),
            failure_block: Regex::new(
                r"(?s)Failure in (?:test|seed) (\S+) \(([^)]+)\)\s*\n(.*?)(?:\n\s*\n|\z)",
            )
            .expect("static failure-block pattern"),
            schema_block: Regex::new(
                r"(?s)(?:Parsing|Validation) Error.*?in\s+(\S+\.ya?ml)\s*\n(.*?)(?:\n\s*\n|\z)",
            )
            .expect("static schema-block pattern"),
            result_line: Regex::new(
                r"\d+ of \d+ (PASS|FAIL|ERROR|WARN|SKIP)\s+(?:\d+\s+)?(?:loading\s+)?(?:seed\s+file\s+|model\s+|test\s+)?(\S+)",
            )
            .expect("static result-line pattern"),
            summary_error: Regex::new(
                r"\d+ of \d+ (ERROR|FAIL)\s+(?:loading\s+)?(?:seed\s+file\s+|model\s+|test\s+)?\S+",
            )
            .expect("static summary pattern"),
            category_table,
        }
    }

    /// Assign a category to a diagnostic block via the ordered table.
    pub fn classify(&self, block: &str) -> ErrorCategory {
        for (pattern, category) in &self.category_table {
            if pattern.is_match(block) {
                return *category;
            }
        }
        ErrorCategory::Unknown
    }

    /// Extract structured errors from combined build output.
    ///
    /// One record per distinct diagnostic block. Result lines are recorded
    /// only when no structured block already named the same entity.
    pub fn parse(&self, output: &str) -> Vec<BuildError> {
        let mut errors: Vec<BuildError> = Vec::new();
        let mut seen_entities: HashSet<String> = HashSet::new();
        let mut seen_files: HashSet<String> = HashSet::new();

        for caps in self.header_block.captures_iter(output) {
            let entity = caps[3].to_string();
            let file = caps[4].to_string();
            let block = caps[0].trim_end().to_string();
            let message = caps[5].trim().to_string();
            seen_entities.insert(entity.clone());
            seen_files.insert(file.clone());
            errors.push(
                BuildError::new(self.classify(&block), message)
                    .with_entity(entity)
                    .with_file(file)
                    .with_evidence(block),
            );
        }

        for caps in self.failure_block.captures_iter(output) {
            let entity = caps[1].to_string();
            if seen_entities.contains(&entity) {
                continue;
            }
            let file = caps[2].to_string();
            let block = caps[0].trim_end().to_string();
            let message = caps[3].trim().to_string();
            seen_entities.insert(entity.clone());
            seen_files.insert(file.clone());
            errors.push(
                BuildError::new(ErrorCategory::TestFailure, message)
                    .with_entity(entity)
                    .with_file(file)
                    .with_evidence(block),
            );
        }

        for caps in self.schema_block.captures_iter(output) {
            let file = caps[1].to_string();
            if seen_files.contains(&file) {
                continue;
            }
            let block = caps[0].trim_end().to_string();
            let message = caps[2].trim().to_string();
            seen_files.insert(file.clone());
            errors.push(
                BuildError::new(ErrorCategory::Syntax, message)
                    .with_file(file)
                    .with_evidence(block),
            );
        }

        for caps in self.result_line.captures_iter(output) {
            let status = &caps[1];
            if status != "FAIL" && status != "ERROR" {
                continue;
            }
            let entity = caps[2].to_string();
            if seen_entities.contains(&entity) {
                continue;
            }
            seen_entities.insert(entity.clone());
            let line = caps[0].to_string();
            errors.push(
                BuildError::new(self.classify(&line), format!("{}: {}", status, entity))
                    .with_entity(entity)
                    .with_evidence(line),
            );
        }

        // Generic fallback when no block matched but indicator text exists.
        if errors.is_empty() && (output.contains("ERROR") || output.contains("Error")) {
            errors.push(self.fallback_error(output));
        }

        debug!(count = errors.len(), "parsed build errors");
        errors
    }

    /// Whether the output contains failure indicators regardless of exit
    /// code (false-positive detection for exit-code-0 failures).
    pub fn has_error_indicators(&self, output: &str) -> bool {
        ERROR_INDICATORS
            .iter()
            .any(|indicator| output.contains(indicator))
            || self.summary_error.is_match(output)
    }

    /// Build the single error that wraps unclassifiable failing output.
    pub fn fallback_error(&self, output: &str) -> BuildError {
        let context = extract_context(output, 500);
        let tail: String = tail_chars(output, 2000);
        BuildError::new(self.classify(&context), context).with_evidence(tail)
    }

    /// Count errors by category for progress messages.
    pub fn error_summary(errors: &[BuildError]) -> BTreeMap<String, usize> {
        let mut summary = BTreeMap::new();
        for error in errors {
            *summary.entry(error.category.as_str().to_string()).or_insert(0) += 1;
        }
        summary
    }
}

/// Pull the most error-relevant lines out of raw output, falling back to
/// the tail of the text.
pub fn extract_context(output: &str, max_len: usize) -> String {
    let error_lines: Vec<&str> = output
        .lines()
        .filter(|line| line.contains("Error") || line.contains("FAIL"))
        .map(str::trim)
        .take(5)
        .collect();
    if !error_lines.is_empty() {
        return error_lines.join("\n");
    }
    tail_chars(output, max_len)
}

fn tail_chars(text: &str, max_len: usize) -> String {
    let count = text.chars().count();
    if count <= max_len {
        text.to_string()
    } else {
        text.chars().skip(count - max_len).collect()
    }
}
