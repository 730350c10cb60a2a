//! Fix-candidate extraction from model replies.

/// Literal token opening a candidate fix inside model text.
pub const FIX_START: &str = "<<<FIXED_CODE_START>>>";
/// Literal token closing a candidate fix.
pub const FIX_END: &str = "<<<FIXED_CODE_END>>>";

/// Return the trimmed text between the first start marker and the first end
/// marker after it.
///
/// Returns `None` when either marker is missing or the enclosed text is blank.
/// Later marker pairs are ignored.
pub fn extract_candidate(text: &str) -> Option<&str> {
    let start = text.find(FIX_START)? + FIX_START.len();
    let end = text[start..].find(FIX_END)? + start;
    let candidate = text[start..end].trim();
    (!candidate.is_empty()).then_some(candidate)
}

/// Decide whether `reply` carries a candidate that should replace `current`.
///
/// Absent, blank, or unchanged candidates yield `None`, so an existing
/// candidate is never cleared.
pub fn candidate_update(reply: &str, current: &str) -> Option<String> {
    extract_candidate(reply)
        .filter(|candidate| *candidate != current)
        .map(str::to_string)
}
