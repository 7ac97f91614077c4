//! Built-in text steps.

use crate::{Failure, Outcome, Preprocessor, Source};
use std::sync::Arc;

/// Share of control characters above which text is treated as binary.
const MAX_CONTROL_RATIO: f64 = 0.01;

pub(crate) fn builtins() -> Vec<Arc<dyn Preprocessor>> {
    vec![
        Arc::new(NormalizeNewlines),
        Arc::new(StripTrailingWhitespace),
        Arc::new(DedupeLines),
        Arc::new(RejectEmpty),
        Arc::new(RejectBinaryLike),
        Arc::new(RequireAscii),
        Arc::new(SplitBlankLineBlocks),
    ]
}

/// Rewrites `\r\n` and lone `\r` line endings to `\n`.
struct NormalizeNewlines;
impl Preprocessor for NormalizeNewlines {
    fn name(&self) -> &'static str {
        "normalize_newlines"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        if !text.contains('\r') {
            return Ok(vec![text]);
        }
        Ok(vec![text.replace("\r\n", "\n").replace('\r', "\n")])
    }
}

struct StripTrailingWhitespace;
impl Preprocessor for StripTrailingWhitespace {
    fn name(&self) -> &'static str {
        "strip_trailing_whitespace"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        Ok(vec![text.split('\n').map(str::trim_end).collect::<Vec<_>>().join("\n")])
    }
}

/// Collapses runs of identical adjacent lines into one.
struct DedupeLines;
impl Preprocessor for DedupeLines {
    fn name(&self) -> &'static str {
        "dedupe_lines"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        let mut lines: Vec<&str> = text.split('\n').collect();
        lines.dedup();
        Ok(vec![lines.join("\n")])
    }
}

struct RejectEmpty;
impl Preprocessor for RejectEmpty {
    fn name(&self) -> &'static str {
        "reject_empty"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        if text.trim().is_empty() {
            return Err(Failure::bad_input("no content"));
        }
        Ok(vec![text])
    }
}

struct RejectBinaryLike;
impl Preprocessor for RejectBinaryLike {
    fn name(&self) -> &'static str {
        "reject_binary_like"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        if text.contains('\0') {
            return Err(Failure::bad_input("contains NUL bytes"));
        }
        let total = text.chars().count();
        let control = text.chars().filter(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')).count();
        if total > 0 && control as f64 / total as f64 > MAX_CONTROL_RATIO {
            return Err(Failure::bad_input(format!("{control} of {total} characters are control characters")));
        }
        Ok(vec![text])
    }
}

struct RequireAscii;
impl Preprocessor for RequireAscii {
    fn name(&self) -> &'static str {
        "require_ascii"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        if let Some((line, c)) = text
            .split('\n')
            .enumerate()
            .find_map(|(n, line)| line.chars().find(|c| !c.is_ascii()).map(|c| (n + 1, c)))
        {
            return Err(Failure::bad_input(format!("non-ASCII character {c:?} on line {line}")));
        }
        Ok(vec![text])
    }
}

/// Splits text into blocks separated by one or more blank lines. Each block
/// becomes its own output; text with no non-blank lines yields nothing.
struct SplitBlankLineBlocks;
impl Preprocessor for SplitBlankLineBlocks {
    fn name(&self) -> &'static str {
        "split_blank_line_blocks"
    }

    fn process(&self, _source: &Source<'_>, text: String) -> Outcome {
        let mut blocks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        for line in text.split('\n') {
            if line.trim().is_empty() {
                if !current.is_empty() {
                    blocks.push(current.join("\n"));
                    current.clear();
                }
            } else {
                current.push(line);
            }
        }
        if !current.is_empty() {
            blocks.push(current.join("\n"));
        }
        Ok(blocks)
    }
}
