use apiview_protocol::Example;
use sha2::{Digest, Sha256};

/// Trimmed, LF-only text with runs of blank lines collapsed to one.
pub fn canonicalize(raw: &str) -> String {
    let unix = raw.replace("\r\n", "\n").replace('\r', "\n");
    let mut out = String::with_capacity(unix.len());
    let mut newlines = 0usize;
    for ch in unix.trim().chars() {
        if ch == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(ch);
    }
    out
}

fn sha256_hex(text: &str) -> String {
    Sha256::digest(text.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn hash_parts(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .map(|p| canonicalize(p))
        .collect::<Vec<_>>()
        .join("\n\n");
    sha256_hex(&canonicalize(&joined))
}

/// Content hash of a guideline: title, text and its example ids in sorted order.
pub fn guideline_hash(title: &str, text: &str, example_ids: &[String]) -> String {
    let mut ids: Vec<&str> = example_ids.iter().map(String::as_str).collect();
    ids.sort_unstable();
    let ids = ids.join("\n");
    hash_parts(&[title, text, &ids])
}

pub fn example_hash(example: &Example) -> String {
    hash_parts(&[
        &example.comment,
        example.bad_code.as_deref().unwrap_or_default(),
        example.good_code.as_deref().unwrap_or_default(),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn canonical_form_ignores_line_endings_and_blank_runs() {
        assert_eq!(canonicalize("  a\r\n\r\n\r\n\r\nb \n"), "a\n\nb");
        assert_eq!(canonicalize("a\rb"), "a\nb");
    }

    #[test]
    fn guideline_hash_is_order_insensitive_for_examples() {
        let a = guideline_hash("T", "body", &["x-2".into(), "x-1".into()]);
        let b = guideline_hash("T", "body\r\n", &["x-1".into(), "x-2".into()]);
        assert_eq!(a, b);
        assert_ne!(a, guideline_hash("T", "body changed", &["x-1".into(), "x-2".into()]));
        assert_eq!(a.len(), 64);
    }
}
