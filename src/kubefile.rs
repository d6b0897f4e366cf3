//! Kubefile parsing
//!
//! Turns an instruction file into the ordered layer list the build engine
//! consumes. The grammar is deliberately small: `#` comments, blank lines,
//! trailing-backslash continuation, and one `KIND value` instruction per
//! logical line, where KIND is FROM, COPY, RUN or CMD.

use crate::error::{StrataError, StrataResult};
use crate::image::{Layer, LayerKind};
use std::path::Path;
use tokio::fs;

/// Parse a Kubefile from disk
pub async fn parse_file(path: &Path) -> StrataResult<Vec<Layer>> {
    if !path.is_file() {
        return Err(StrataError::KubefileNotFound(path.to_path_buf()));
    }
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
    parse(&content)
}

/// Parse Kubefile content into an ordered layer list.
///
/// The returned list is non-empty and starts with FROM; anything else is a
/// configuration error.
pub fn parse(content: &str) -> StrataResult<Vec<Layer>> {
    let mut layers = Vec::new();

    for (line_no, logical) in logical_lines(content) {
        let (word, rest) = match logical.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (logical.as_str(), ""),
        };

        let kind: LayerKind = word
            .parse()
            .map_err(|_| StrataError::KubefileInvalid {
                line: line_no,
                reason: format!("unknown instruction {word}"),
            })?;

        if rest.is_empty() {
            return Err(StrataError::KubefileInvalid {
                line: line_no,
                reason: format!("{kind} requires a value"),
            });
        }

        if kind == LayerKind::From && !layers.is_empty() {
            return Err(StrataError::KubefileInvalid {
                line: line_no,
                reason: "FROM is only allowed as the first instruction".to_string(),
            });
        }

        layers.push(Layer::new(kind, rest));
    }

    match layers.first() {
        None => Err(StrataError::EmptyInstructionList),
        Some(first) if first.kind != LayerKind::From => Err(
            StrataError::FirstInstructionNotFrom(first.kind.to_string()),
        ),
        Some(_) => Ok(layers),
    }
}

/// Join continuation lines and strip comments/blanks. Yields
/// (1-based line number of the first physical line, logical line).
fn logical_lines(content: &str) -> Vec<(usize, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(usize, String)> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if pending.is_none() && (line.is_empty() || line.starts_with('#')) {
            continue;
        }

        let (continued, fragment) = match line.strip_suffix('\\') {
            Some(head) => (true, head.trim_end()),
            None => (false, line),
        };

        match pending.take() {
            Some((start, mut acc)) => {
                acc.push(' ');
                acc.push_str(fragment);
                if continued {
                    pending = Some((start, acc));
                } else {
                    lines.push((start, acc));
                }
            }
            None => {
                if continued {
                    pending = Some((idx + 1, fragment.to_string()));
                } else {
                    lines.push((idx + 1, fragment.to_string()));
                }
            }
        }
    }

    // Trailing backslash on the last line: keep what we have
    if let Some(dangling) = pending {
        lines.push(dangling);
    }

    lines
}
