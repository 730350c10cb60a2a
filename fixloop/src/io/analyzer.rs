//! Heuristic error analysis offered to the agent as a tool.

use std::sync::LazyLock;

use regex::Regex;

/// Maps an error message to human-readable hints.
///
/// Implementations must be deterministic and free of side effects.
pub trait ErrorAnalyzer: Sync {
    fn analyze(&self, error_message: &str, code: &str) -> String;
}

/// Ordered pattern table; the first matching exception name wins.
const HINTS: &[(&str, &str)] = &[
    (
        "SyntaxError",
        "Syntax error detected. Check for missing colons, parentheses, or incorrect indentation.",
    ),
    (
        "NameError",
        "Variable or function name not defined. Check variable names and imports.",
    ),
    (
        "TypeError",
        "Type mismatch. Check function arguments and variable types.",
    ),
    ("IndexError", "Index out of range. Check list/array bounds."),
    ("KeyError", "Dictionary key not found. Check dictionary keys."),
    (
        "AttributeError",
        "Attribute or method doesn't exist. Check object methods and attributes.",
    ),
    (
        "ZeroDivisionError",
        "Division by zero. Add validation for denominators.",
    ),
    (
        "IndentationError",
        "Incorrect indentation. Fix spacing and tabs.",
    ),
];

const FALLBACK_HINT: &str = "Check the error message carefully for clues.";

/// Line of a traceback naming the raised exception, e.g. `ValueError: bad input`.
static EXCEPTION_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt))\b(?::\s*(.*))?$")
        .expect("exception line regex should be valid")
});

/// Pattern-table analyzer for Python tracebacks.
#[derive(Debug, Clone, Copy, Default)]
pub struct PatternAnalyzer;

impl PatternAnalyzer {
    /// The last exception line of the traceback, which names the error raised.
    fn raised_exception(error_message: &str) -> Option<String> {
        EXCEPTION_LINE_RE
            .find_iter(error_message)
            .last()
            .map(|m| m.as_str().trim().to_string())
    }
}

impl ErrorAnalyzer for PatternAnalyzer {
    fn analyze(&self, error_message: &str, code: &str) -> String {
        let mut analysis = vec!["Error Analysis:".to_string()];

        let hint = HINTS
            .iter()
            .find(|(pattern, _)| error_message.contains(pattern))
            .map_or(FALLBACK_HINT, |(_, hint)| hint);
        analysis.push(format!("- {hint}"));

        if let Some(raised) = Self::raised_exception(error_message) {
            analysis.push(format!("- Raised: {raised}"));
        }

        analysis.push(format!("\nCode length: {} lines", code.lines().count()));
        analysis.join("\n")
    }
}
