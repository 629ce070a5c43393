use crate::config::SectionerConfig;
use crate::diff::{self, DiffLine};
use crate::error::{Result, SectionerError};
use crate::types::{LineData, Section};

/// An input surface split into overlapping, indentation-aware sections
#[derive(Debug, Clone)]
pub struct SectionedDocument {
    config: SectionerConfig,
    lines: Vec<LineData>,
    sections: Vec<Section>,
    diff_mode: bool,
}

impl SectionedDocument {
    /// Section pre-parsed lines. Line numbers must start at 1 and increase by one.
    pub fn new(lines: Vec<LineData>, config: SectionerConfig, diff_mode: bool) -> Result<Self> {
        config.validate().map_err(SectionerError::invalid_config)?;
        for (idx, line) in lines.iter().enumerate() {
            if line.line_no != idx + 1 {
                return Err(SectionerError::InvalidNumbering {
                    line_no: line.line_no,
                    reason: format!("expected {}", idx + 1),
                });
            }
        }

        let sections = split_sections(&lines, &config);
        log::debug!(
            "sectioned {} lines into {} sections (max={}, overlap={})",
            lines.len(),
            sections.len(),
            config.max_chunk_size,
            config.overlap
        );
        Ok(Self {
            config,
            lines,
            sections,
            diff_mode,
        })
    }

    /// Full-mode document: every line is unchanged.
    pub fn from_text(target: &str, config: SectionerConfig) -> Result<Self> {
        Self::from_diff_lines(diff::plain_lines(target), config, false)
    }

    /// Diff-mode document built from a line-aligned diff of `base` and `target`.
    pub fn from_diff(base: &str, target: &str, config: SectionerConfig) -> Result<Self> {
        Self::from_diff_lines(diff::diff_lines(base, target), config, true)
    }

    /// Document from text whose lines carry `+`/`-` tags.
    pub fn from_tagged(text: &str, config: SectionerConfig) -> Result<Self> {
        Self::from_diff_lines(diff::tagged_lines(text), config, true)
    }

    fn from_diff_lines(lines: Vec<DiffLine>, config: SectionerConfig, diff_mode: bool) -> Result<Self> {
        let unit = config.indent_unit;
        let lines = lines
            .into_iter()
            .enumerate()
            .map(|(idx, l)| LineData::new(idx + 1, l.text, l.mark, l.target_line_no, unit))
            .collect();
        Self::new(lines, config, diff_mode)
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    #[must_use]
    pub fn lines(&self) -> &[LineData] {
        &self.lines
    }

    #[must_use]
    pub fn line(&self, line_no: usize) -> Option<&LineData> {
        line_no.checked_sub(1).and_then(|idx| self.lines.get(idx))
    }

    #[must_use]
    pub const fn is_diff(&self) -> bool {
        self.diff_mode
    }

    #[must_use]
    pub const fn config(&self) -> &SectionerConfig {
        &self.config
    }

    #[must_use]
    pub fn added_line_count(&self) -> usize {
        self.lines.iter().filter(|l| l.is_added()).count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Greedy split: fill a section up to `max_chunk_size` lines, then cut before
/// the last non-blank line (after the overlap zone) whose indent equals the
/// section's starting indent. Without such a line the cut is at the cap.
/// The next section starts `overlap` lines before the cut.
fn split_sections(lines: &[LineData], config: &SectionerConfig) -> Vec<Section> {
    let total = lines.len();
    let max = config.max_chunk_size;
    let overlap = config.overlap;
    let mut sections = Vec::new();
    let mut start = 0usize;

    while start < total {
        let end = if total - start <= max {
            total
        } else {
            let cap = start + max;
            let start_indent = lines[start].indent;
            ((start + overlap + 1)..=cap)
                .rev()
                .find(|&j| !lines[j].is_blank() && lines[j].indent == start_indent)
                .unwrap_or(cap)
        };

        sections.push(Section {
            chunk_index: sections.len(),
            lines: lines[start..end].to_vec(),
        });

        if end == total {
            break;
        }
        start = end - overlap;
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ranges(doc: &SectionedDocument) -> Vec<(usize, usize)> {
        doc.sections()
            .iter()
            .map(|s| (s.first_line_no(), s.last_line_no()))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_sections() {
        let doc = SectionedDocument::from_text("", SectionerConfig::default()).unwrap();
        assert!(doc.sections().is_empty());
        assert!(doc.is_empty());
    }

    #[test]
    fn rejects_overlap_not_below_max() {
        let err = SectionedDocument::from_text("a", SectionerConfig::with_limits(3, 3)).unwrap_err();
        assert!(matches!(err, SectionerError::InvalidConfig(_)));
    }

    #[test]
    fn small_documents_fit_one_section() {
        let doc = SectionedDocument::from_text("a\nb\nc", SectionerConfig::with_limits(5, 1)).unwrap();
        assert_eq!(ranges(&doc), vec![(1, 3)]);
    }

    #[test]
    fn cuts_at_block_boundary() {
        let text = "class A:\n    a\n    b\nclass B:\n    c\n    d\n    e\n";
        let doc = SectionedDocument::from_text(text, SectionerConfig::with_limits(5, 0)).unwrap();
        assert_eq!(ranges(&doc), vec![(1, 3), (4, 7)]);
    }

    #[test]
    fn falls_back_to_size_cap_without_boundary() {
        let text = "root\n    a\n    b\n    c\n    d\n    e\n";
        let doc = SectionedDocument::from_text(text, SectionerConfig::with_limits(3, 1)).unwrap();
        assert_eq!(ranges(&doc), vec![(1, 3), (3, 5), (5, 6)]);
    }

    #[test]
    fn diff_document_numbers_by_position() {
        let doc = SectionedDocument::from_diff("a\nb\n", "a\nc\n", SectionerConfig::default()).unwrap();
        assert!(doc.is_diff());
        let numbers: Vec<_> = doc.lines().iter().map(|l| l.line_no).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(doc.added_line_count(), 1);
        let added = doc.lines().iter().find(|l| l.is_added()).unwrap();
        assert_eq!(added.target_line_no, Some(2));
    }

    #[test]
    fn rejects_gapped_numbering() {
        let lines = vec![
            LineData::new(1, "a", crate::DiffMark::Unchanged, Some(1), 4),
            LineData::new(3, "b", crate::DiffMark::Unchanged, Some(3), 4),
        ];
        assert!(SectionedDocument::new(lines, SectionerConfig::default(), false).is_err());
    }
}
