//! PEM chain utilities.

/// Collapses CRLF/LF runs to a single `\n`, inserts a blank line between
/// two certificates that abut without one, and ensures a trailing
/// newline.
pub fn format_pem_chain(input: &str) -> String {
    let normalized = input.replace("\r\n", "\n");
    let mut out = String::with_capacity(normalized.len());
    let mut chars = normalized.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c == '\n' {
            // collapse any further newlines in this run down to the one just pushed
            while chars.peek() == Some(&'\n') {
                chars.next();
            }
            // re-insert a single separating blank line between abutting certs
            if out.ends_with("-\n") && chars.peek() == Some(&'-') {
                out.push('\n');
            }
        }
    }

    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Trims the input and splits on any run of one or more blank lines
/// (i.e. two or more consecutive newlines), appending a trailing `\n` to
/// each resulting block. This is the inverse of [`format_pem_chain`],
/// which inserts exactly one blank line between abutting certificates —
/// the split threshold has to match that to round-trip.
pub fn split_pem_chain(input: &str) -> Vec<String> {
    let normalized = input.replace("\r\n", "\n");
    let trimmed = normalized.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut blocks = Vec::new();
    let mut current = String::new();
    let mut blank_run = 0usize;

    for line in trimmed.lines() {
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if blank_run >= 1 && !current.is_empty() {
            blocks.push(current.clone());
            current.clear();
        }
        blank_run = 0;
        current.push_str(line);
        current.push('\n');
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

/// Splits a freshly downloaded certificate chain into `(leaf, chain)`,
/// where `chain` is every remaining block joined back together.
pub fn split_leaf_and_chain(input: &str) -> (String, String) {
    let blocks = split_pem_chain(input);
    let mut iter = blocks.into_iter();
    let leaf = iter.next().unwrap_or_default();
    let chain = iter.collect::<Vec<_>>().join("\n");
    (leaf, chain)
}
