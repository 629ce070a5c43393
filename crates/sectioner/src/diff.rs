use crate::types::DiffMark;
use similar::{ChangeTag, TextDiff};

/// One line of a line-aligned diff between base and target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffLine {
    pub mark: DiffMark,
    pub text: String,
    /// 1-based line number in the target, `None` for removed lines
    pub target_line_no: Option<usize>,
}

/// Compute a line-aligned diff. Unchanged lines are kept so sections keep
/// their surrounding context.
pub fn diff_lines(base: &str, target: &str) -> Vec<DiffLine> {
    let base = with_trailing_newline(base);
    let target = with_trailing_newline(target);
    let diff = TextDiff::from_lines(base.as_str(), target.as_str());

    diff.iter_all_changes()
        .map(|change| {
            let (mark, target_line_no) = match change.tag() {
                ChangeTag::Equal => (DiffMark::Unchanged, change.new_index().map(|i| i + 1)),
                ChangeTag::Insert => (DiffMark::Added, change.new_index().map(|i| i + 1)),
                ChangeTag::Delete => (DiffMark::Removed, None),
            };
            DiffLine {
                mark,
                text: strip_line_ending(change.value()).to_string(),
                target_line_no,
            }
        })
        .collect()
}

/// Lines of a standalone document, all unchanged.
pub fn plain_lines(target: &str) -> Vec<DiffLine> {
    target
        .lines()
        .enumerate()
        .map(|(i, text)| DiffLine {
            mark: DiffMark::Unchanged,
            text: text.to_string(),
            target_line_no: Some(i + 1),
        })
        .collect()
}

/// Parse text whose lines carry a leading `+`/`-`/space diff tag.
pub fn tagged_lines(text: &str) -> Vec<DiffLine> {
    let mut target_line = 0usize;
    text.lines()
        .map(|raw| {
            let (mark, body) = match raw.chars().next() {
                Some('+') => (DiffMark::Added, &raw[1..]),
                Some('-') => (DiffMark::Removed, &raw[1..]),
                Some(' ') => (DiffMark::Unchanged, &raw[1..]),
                _ => (DiffMark::Absent, raw),
            };
            let target_line_no = if mark == DiffMark::Removed {
                None
            } else {
                target_line += 1;
                Some(target_line)
            };
            DiffLine {
                mark,
                text: body.to_string(),
                target_line_no,
            }
        })
        .collect()
}

fn with_trailing_newline(text: &str) -> String {
    let normalized = text.replace("\r\n", "\n");
    if normalized.is_empty() || normalized.ends_with('\n') {
        normalized
    } else {
        normalized + "\n"
    }
}

fn strip_line_ending(s: &str) -> &str {
    s.strip_suffix('\n')
        .map(|s| s.strip_suffix('\r').unwrap_or(s))
        .unwrap_or(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn identical_inputs_have_no_changes() {
        let lines = diff_lines("a\nb", "a\nb\n");
        assert!(lines.iter().all(|l| l.mark == DiffMark::Unchanged));
        assert_eq!(lines.len(), 2);
    }

    #[test]
    fn added_line_carries_target_number() {
        let lines = diff_lines("class A:\n    pass\n", "class A:\n    def GetThing(self): pass\n    pass\n");
        let added: Vec<_> = lines.iter().filter(|l| l.mark == DiffMark::Added).collect();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].target_line_no, Some(2));
        assert_eq!(added[0].text, "    def GetThing(self): pass");
    }

    #[test]
    fn removed_lines_have_no_target_number() {
        let lines = diff_lines("a\nb\nc\n", "a\nc\n");
        let removed: Vec<_> = lines.iter().filter(|l| l.mark == DiffMark::Removed).collect();
        assert_eq!(removed.len(), 1);
        assert_eq!(removed[0].target_line_no, None);
        assert_eq!(lines.last().and_then(|l| l.target_line_no), Some(2));
    }

    #[test]
    fn tagged_lines_parse_prefixes() {
        let lines = tagged_lines("+a\n-b\n c\nd");
        let marks: Vec<_> = lines.iter().map(|l| l.mark).collect();
        assert_eq!(
            marks,
            vec![DiffMark::Added, DiffMark::Removed, DiffMark::Unchanged, DiffMark::Absent]
        );
        assert_eq!(lines[2].target_line_no, Some(2));
        assert_eq!(lines[0].text, "a");
    }
}
