//! Parsing of raw-text submissions and of readability output into
//! paragraph lists.

/// A parsed raw-text submission: an optional explicit `# Headline` and
/// the body paragraphs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSubmission {
    pub title: Option<String>,
    pub paragraphs: Vec<String>,
}

/// Split body text into paragraphs on blank lines. Lines inside a
/// paragraph are rejoined with single spaces; empty paragraphs vanish.
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join(" "));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join(" "));
    }

    paragraphs
}

/// Parse a pasted submission. A leading `# Headline` line becomes the
/// explicit title; everything after it is the body.
pub fn parse_text_submission(input: &str) -> TextSubmission {
    let trimmed = input.trim_start();

    if let Some(first_line) = trimmed.lines().next() {
        if let Some(heading) = first_line.strip_prefix("# ") {
            let title = heading.trim();
            let body = trimmed
                .get(first_line.len()..)
                .unwrap_or_default();
            if !title.is_empty() {
                return TextSubmission {
                    title: Some(title.to_string()),
                    paragraphs: split_paragraphs(body),
                };
            }
        }
    }

    TextSubmission {
        title: None,
        paragraphs: split_paragraphs(input),
    }
}
