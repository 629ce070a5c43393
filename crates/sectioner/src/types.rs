use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Diff marker attached to each line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffMark {
    Unchanged,
    Added,
    Removed,
    /// The line carries no diff information at all
    Absent,
}

impl DiffMark {
    /// Prefix rendered in front of the line text
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::Added => "+",
            Self::Removed => "-",
            Self::Unchanged | Self::Absent => "",
        }
    }
}

/// A single parsed input line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineData {
    /// Position in the sectioned document (1-indexed)
    pub line_no: usize,

    /// Indentation level (0-based)
    pub indent: usize,

    /// Line text without diff prefix or trailing newline
    pub text: String,

    pub diff_mark: DiffMark,

    /// Line number in the reviewed target, absent for removed lines
    pub target_line_no: Option<usize>,
}

impl LineData {
    /// Build a line, computing its indentation level from leading whitespace.
    #[must_use]
    pub fn new(
        line_no: usize,
        text: impl Into<String>,
        diff_mark: DiffMark,
        target_line_no: Option<usize>,
        indent_unit: usize,
    ) -> Self {
        let text = text.into();
        let indent = indent_level(&text, indent_unit);
        Self {
            line_no,
            indent,
            text,
            diff_mark,
            target_line_no,
        }
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    #[must_use]
    pub const fn is_added(&self) -> bool {
        matches!(self.diff_mark, DiffMark::Added)
    }
}

fn indent_level(text: &str, indent_unit: usize) -> usize {
    let unit = indent_unit.max(1);
    let mut width = 0usize;
    for ch in text.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width += unit,
            _ => break,
        }
    }
    width / unit
}

/// A window of consecutive lines handed to the model as one prompt unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    /// Stable position of this section in the document
    pub chunk_index: usize,

    pub lines: Vec<LineData>,
}

impl Section {
    #[must_use]
    pub fn first_line_no(&self) -> usize {
        self.lines.first().map_or(0, |l| l.line_no)
    }

    #[must_use]
    pub fn last_line_no(&self) -> usize {
        self.lines.last().map_or(0, |l| l.line_no)
    }

    #[must_use]
    pub fn contains_line(&self, line_no: usize) -> bool {
        line_no >= self.first_line_no() && line_no <= self.last_line_no()
    }

    /// Look a line up by its document number.
    #[must_use]
    pub fn line(&self, line_no: usize) -> Option<&LineData> {
        let idx = self.idx_for_line_no(line_no)?;
        self.lines.get(idx)
    }

    #[must_use]
    pub fn idx_for_line_no(&self, line_no: usize) -> Option<usize> {
        self.lines.binary_search_by_key(&line_no, |l| l.line_no).ok()
    }

    pub fn added_lines(&self) -> impl Iterator<Item = &LineData> {
        self.lines.iter().filter(|l| l.is_added())
    }

    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.lines
            .iter()
            .any(|l| matches!(l.diff_mark, DiffMark::Added | DiffMark::Removed))
    }

    /// Render as `"<n>: [+|-]<text>"`, one line each.
    #[must_use]
    pub fn numbered(&self) -> String {
        let mut out = String::new();
        for line in &self.lines {
            let _ = writeln!(out, "{}: {}{}", line.line_no, line.diff_mark.prefix(), line.text);
        }
        out
    }

    /// Plain text of the section.
    #[must_use]
    pub fn text(&self) -> String {
        self.lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Query text used to retrieve evidence for this section.
    ///
    /// With diff marks present this is every added line plus the lines that
    /// open its enclosing blocks; otherwise the whole section text.
    #[must_use]
    pub fn retrieval_query(&self, max_chars: usize) -> String {
        let added: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, l)| l.is_added())
            .map(|(i, _)| i)
            .collect();

        let query = if added.is_empty() {
            self.text()
        } else {
            let mut picked = std::collections::BTreeSet::new();
            for &idx in &added {
                picked.insert(idx);
                let mut indent = self.lines[idx].indent;
                for j in (0..idx).rev() {
                    if indent == 0 {
                        break;
                    }
                    let candidate = &self.lines[j];
                    if candidate.is_blank() || candidate.diff_mark == DiffMark::Removed {
                        continue;
                    }
                    if candidate.indent < indent {
                        picked.insert(j);
                        indent = candidate.indent;
                    }
                }
            }
            picked
                .into_iter()
                .map(|i| self.lines[i].text.trim())
                .collect::<Vec<_>>()
                .join("\n")
        };

        truncate_chars(&query, max_chars)
    }

    /// Find the line whose text contains `excerpt`, starting at `line_no` and
    /// searching upwards then downwards until a blank line.
    #[must_use]
    pub fn locate_excerpt(&self, line_no: usize, excerpt: &str) -> Option<usize> {
        let needle = excerpt.trim();
        if needle.is_empty() {
            return None;
        }
        let start = self.idx_for_line_no(line_no)?;
        let hit = |l: &LineData| l.text.contains(needle);

        if hit(&self.lines[start]) {
            return Some(self.lines[start].line_no);
        }
        for line in self.lines[..start].iter().rev() {
            if line.is_blank() {
                break;
            }
            if hit(line) {
                return Some(line.line_no);
            }
        }
        for line in &self.lines[start + 1..] {
            if line.is_blank() {
                break;
            }
            if hit(line) {
                return Some(line.line_no);
            }
        }
        None
    }
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}
