use apiview_sectioner::{SectionedDocument, SectionerConfig};
use proptest::prelude::*;
use std::collections::BTreeSet;

fn arb_line() -> impl Strategy<Value = String> {
    (0usize..4, prop::option::of("[a-z_]{1,12}")).prop_map(|(depth, body)| match body {
        Some(body) => format!("{}{}", "    ".repeat(depth), body),
        None => String::new(),
    })
}

fn arb_document() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_line(), 0..120).prop_map(|lines| lines.join("\n"))
}

fn arb_config() -> impl Strategy<Value = SectionerConfig> {
    (1usize..40).prop_flat_map(|max| (Just(max), 0..max)).prop_map(|(max, overlap)| {
        SectionerConfig::with_limits(max, overlap)
    })
}

proptest! {
    #[test]
    fn sections_cover_every_line(text in arb_document(), config in arb_config()) {
        let doc = SectionedDocument::from_text(&text, config).unwrap();
        let covered: BTreeSet<usize> = doc
            .sections()
            .iter()
            .flat_map(|s| s.lines.iter().map(|l| l.line_no))
            .collect();
        let expected: BTreeSet<usize> = (1..=doc.lines().len()).collect();
        prop_assert_eq!(covered, expected);
    }

    #[test]
    fn line_numbers_strictly_increase(text in arb_document(), config in arb_config()) {
        let doc = SectionedDocument::from_text(&text, config).unwrap();
        for section in doc.sections() {
            prop_assert!(!section.lines.is_empty());
            prop_assert!(section.lines.len() <= config.max_chunk_size);
            for pair in section.lines.windows(2) {
                prop_assert!(pair[0].line_no < pair[1].line_no);
            }
        }
    }

    #[test]
    fn consecutive_sections_overlap_at_most_configured(text in arb_document(), config in arb_config()) {
        let doc = SectionedDocument::from_text(&text, config).unwrap();
        for (idx, pair) in doc.sections().windows(2).enumerate() {
            prop_assert_eq!(pair[0].chunk_index, idx);
            let shared = pair[0].last_line_no() + 1 - pair[1].first_line_no();
            prop_assert!(shared <= config.overlap);
            prop_assert!(pair[1].first_line_no() > pair[0].first_line_no());
        }
    }

    #[test]
    fn diff_documents_mark_only_target_lines_added(
        base in arb_document(),
        target in arb_document(),
    ) {
        let doc = SectionedDocument::from_diff(&base, &target, SectionerConfig::default()).unwrap();
        let target_lines: Vec<&str> = target.lines().collect();
        for line in doc.lines().iter().filter(|l| l.is_added()) {
            let n = line.target_line_no.unwrap();
            prop_assert_eq!(target_lines[n - 1], line.text.as_str());
        }
    }
}
