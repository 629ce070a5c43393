//! Guideline extraction from the upstream Markdown corpus.
//!
//! A guideline is either one `{% include requirement/... %}` paragraph or a
//! leaf section whose title (or first line) opens with a requirement word.
//! Fenced code inside it becomes linked examples.

use crate::canonical::{canonicalize, example_hash};
use apiview_protocol::{Example, Language, Requirement, GENERAL_LANGUAGE};
use regex::Regex;
use std::collections::HashMap;

const MAX_TITLE_CHARS: usize = 160;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedGuideline {
    pub id: String,
    pub slug: String,
    pub title: String,
    pub text: String,
    pub category: String,
    pub requirement: Option<Requirement>,
    pub examples: Vec<Example>,
}

impl ParsedGuideline {
    pub fn example_ids(&self) -> Vec<String> {
        self.examples.iter().map(|e| e.id.clone()).collect()
    }
}

/// Every guideline found in one corpus file.
#[derive(Debug, Clone, PartialEq)]
pub struct GuidelineFile {
    pub path: String,
    pub language: String,
    pub stem: String,
    pub guidelines: Vec<ParsedGuideline>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Block {
    Heading {
        level: usize,
        title: String,
        anchor: Option<String>,
    },
    Code(String),
    Text(String),
}

#[derive(Debug)]
struct Section {
    level: usize,
    title: String,
    anchor: Option<String>,
    /// Title of the nearest ancestor heading.
    parent: String,
    body: Vec<Block>,
    is_leaf: bool,
}

impl Section {
    fn slug(&self) -> String {
        self.anchor.clone().unwrap_or_else(|| slugify(&self.title))
    }
}

#[derive(Debug)]
struct DraftExample {
    code: String,
    bad: bool,
    comment: String,
}

#[derive(Debug, Default)]
struct Draft {
    lines: Vec<String>,
    prose_since_code: Vec<String>,
    examples: Vec<DraftExample>,
}

#[derive(Debug)]
struct Candidate {
    slug: String,
    title: String,
    category: String,
    requirement: Option<Requirement>,
    draft: Draft,
}

/// Parser for one corpus layout (`<prefix><language>/<file>.md`).
pub struct GuidelineParser {
    prefix: String,
    heading: Regex,
    include: Regex,
    requirement_word: Regex,
    bad_hint: Regex,
}

impl GuidelineParser {
    pub fn new(prefix: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Self {
            prefix: prefix.into(),
            heading: Regex::new(r"^(#{1,6})\s+(.+?)\s*(?:\{#([A-Za-z0-9_.-]+)\})?\s*$")?,
            include: Regex::new(
                r#"(?i)\{%\s*include\s+requirement/(MUSTNO|MUST|SHOULDNO|SHOULD|MAY)\s*(?:id\s*=\s*"([^"]*)")?\s*%\}"#,
            )?,
            requirement_word: Regex::new(
                r"^[*_\s]*(DO NOT|DO|MUST NOT|MUST|SHOULD NOT|SHOULD|MAY|CONSIDER|AVOID)\b",
            )?,
            bad_hint: Regex::new(r"(?i)\b(bad|don't|avoid|incorrect|wrong)\b")?,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Language folder of a corpus path; `None` for anything outside the corpus.
    pub fn language_for(&self, path: &str) -> Option<String> {
        let path = path.replace('\\', "/");
        if !path.to_ascii_lowercase().ends_with(".md") {
            return None;
        }
        let rest = path.strip_prefix(self.prefix.as_str())?;
        let (folder, file) = rest.split_once('/')?;
        if file.is_empty() {
            return None;
        }
        if folder == GENERAL_LANGUAGE {
            return Some(GENERAL_LANGUAGE.to_string());
        }
        Language::ALL
            .iter()
            .find(|l| l.as_str() == folder)
            .map(|l| l.as_str().to_string())
    }

    pub fn parse(&self, path: &str, content: &str) -> Option<GuidelineFile> {
        let language = self.language_for(path)?;
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let stem = file_name
            .get(..file_name.len().saturating_sub(3))
            .unwrap_or(file_name)
            .to_string();

        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut guidelines = Vec::new();
        for section in self.sections(content) {
            for candidate in self.candidates(&section) {
                let count = seen.entry(candidate.slug.clone()).or_insert(0);
                *count += 1;
                let slug = if *count == 1 {
                    candidate.slug.clone()
                } else {
                    format!("{}-{count}", candidate.slug)
                };
                guidelines.push(build(&language, &stem, slug, candidate));
            }
        }

        Some(GuidelineFile {
            path: path.to_string(),
            language,
            stem,
            guidelines,
        })
    }

    fn blocks(&self, content: &str) -> Vec<Block> {
        let mut blocks = Vec::new();
        let mut fence: Option<(&str, Vec<&str>)> = None;
        for line in content.lines() {
            let trimmed = line.trim();
            if let Some((marker, code)) = fence.as_mut() {
                if trimmed.starts_with(*marker) && trimmed.trim_start_matches(|c| c == '`' || c == '~').is_empty() {
                    blocks.push(Block::Code(code.join("\n")));
                    fence = None;
                } else {
                    code.push(line);
                }
                continue;
            }
            if trimmed.starts_with("```") {
                fence = Some(("```", Vec::new()));
            } else if trimmed.starts_with("~~~") {
                fence = Some(("~~~", Vec::new()));
            } else if let Some(caps) = self.heading.captures(line) {
                blocks.push(Block::Heading {
                    level: caps.get(1).map_or(1, |m| m.as_str().len()),
                    title: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
                    anchor: caps.get(3).map(|m| m.as_str().to_string()),
                });
            } else {
                blocks.push(Block::Text(line.to_string()));
            }
        }
        // unterminated fence runs to the end of the file
        if let Some((_, code)) = fence {
            blocks.push(Block::Code(code.join("\n")));
        }
        blocks
    }

    fn sections(&self, content: &str) -> Vec<Section> {
        let mut sections: Vec<Section> = Vec::new();
        let mut ancestors: Vec<(usize, String)> = Vec::new();
        for block in self.blocks(content) {
            match block {
                Block::Heading {
                    level,
                    title,
                    anchor,
                } => {
                    while ancestors.last().is_some_and(|(l, _)| *l >= level) {
                        ancestors.pop();
                    }
                    if let Some(prev) = sections.last_mut() {
                        prev.is_leaf = level <= prev.level;
                    }
                    sections.push(Section {
                        level,
                        title: title.clone(),
                        anchor,
                        parent: ancestors.last().map(|(_, t)| t.clone()).unwrap_or_default(),
                        body: Vec::new(),
                        is_leaf: true,
                    });
                    ancestors.push((level, title));
                }
                other => {
                    if let Some(section) = sections.last_mut() {
                        section.body.push(other);
                    }
                }
            }
        }
        sections
    }

    fn candidates(&self, section: &Section) -> Vec<Candidate> {
        let has_markers = section
            .body
            .iter()
            .any(|b| matches!(b, Block::Text(t) if self.include.is_match(t)));
        if has_markers {
            self.marker_candidates(section)
        } else if section.is_leaf {
            self.heading_candidate(section).into_iter().collect()
        } else {
            Vec::new()
        }
    }

    fn marker_candidates(&self, section: &Section) -> Vec<Candidate> {
        let mut out = Vec::new();
        let mut current: Option<Candidate> = None;
        for block in &section.body {
            match block {
                Block::Text(line) => {
                    if let Some(caps) = self.include.captures(line) {
                        out.extend(current.take());
                        let requirement = caps.get(1).map(|m| marker_requirement(m.as_str()));
                        let slug = caps
                            .get(2)
                            .map(|m| m.as_str().trim().to_string())
                            .filter(|s| !s.is_empty())
                            .unwrap_or_else(|| format!("{}-{}", section.slug(), out.len() + 1));
                        let mut draft = Draft::default();
                        let rest = self.include.replace(line, "");
                        draft.push_text(rest.trim());
                        current = Some(Candidate {
                            slug,
                            title: String::new(),
                            category: section.title.clone(),
                            requirement,
                            draft,
                        });
                    } else if let Some(candidate) = current.as_mut() {
                        candidate.draft.push_text(line);
                    }
                }
                Block::Code(code) => {
                    if let Some(candidate) = current.as_mut() {
                        candidate.draft.push_code(code, &self.bad_hint);
                    }
                }
                Block::Heading { .. } => {}
            }
        }
        out.extend(current);
        for candidate in &mut out {
            candidate.title = candidate.draft.first_sentence();
        }
        out.retain(|c| !c.title.is_empty());
        out
    }

    fn heading_candidate(&self, section: &Section) -> Option<Candidate> {
        let mut draft = Draft::default();
        for block in &section.body {
            match block {
                Block::Text(line) => draft.push_text(line),
                Block::Code(code) => draft.push_code(code, &self.bad_hint),
                Block::Heading { .. } => {}
            }
        }
        let first_line = draft
            .lines
            .iter()
            .find(|l| !l.trim().is_empty())
            .cloned()
            .unwrap_or_default();
        let requirement = self
            .word_requirement(&section.title)
            .or_else(|| self.word_requirement(&first_line));
        if requirement.is_none() && section.anchor.is_none() {
            return None;
        }
        if draft.text().is_empty() && draft.examples.is_empty() {
            return None;
        }
        Some(Candidate {
            slug: section.slug(),
            title: section.title.clone(),
            category: section.parent.clone(),
            requirement,
            draft,
        })
    }

    fn word_requirement(&self, text: &str) -> Option<Requirement> {
        let caps = self.requirement_word.captures(text)?;
        Some(match caps.get(1)?.as_str() {
            "MAY" | "CONSIDER" => Requirement::May,
            "SHOULD" | "SHOULD NOT" | "AVOID" => Requirement::Should,
            _ => Requirement::Must,
        })
    }
}

impl Draft {
    fn push_text(&mut self, line: &str) {
        self.lines.push(line.to_string());
        self.prose_since_code.push(line.to_string());
    }

    fn push_code(&mut self, code: &str, bad_hint: &Regex) {
        let prose = self.prose_since_code.join("\n");
        let comment = self
            .prose_since_code
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
            .unwrap_or_default()
            .to_string();
        self.examples.push(DraftExample {
            code: code.to_string(),
            bad: bad_hint.is_match(&prose),
            comment,
        });
        self.prose_since_code.clear();
    }

    fn text(&self) -> String {
        canonicalize(&self.lines.join("\n"))
    }

    fn first_sentence(&self) -> String {
        let text = self.text();
        let line = text.lines().next().unwrap_or_default();
        let sentence = match line.find(". ") {
            Some(end) => &line[..=end],
            None => line,
        };
        sentence.trim().chars().take(MAX_TITLE_CHARS).collect()
    }
}

fn marker_requirement(tag: &str) -> Requirement {
    match tag.to_ascii_uppercase().as_str() {
        "MAY" => Requirement::May,
        "SHOULD" | "SHOULDNO" => Requirement::Should,
        _ => Requirement::Must,
    }
}

fn build(language: &str, stem: &str, slug: String, candidate: Candidate) -> ParsedGuideline {
    let id = format!("{language}_{stem}=html={slug}");
    let examples = candidate
        .draft
        .examples
        .iter()
        .enumerate()
        .map(|(n, ex)| {
            let (good_code, bad_code) = if ex.bad {
                (None, Some(ex.code.clone()))
            } else {
                (Some(ex.code.clone()), None)
            };
            let mut example = Example {
                id: format!("{id}-example-{}", n + 1),
                language: language.to_string(),
                good_code,
                bad_code,
                comment: ex.comment.clone(),
                guideline_ids: vec![id.clone()],
                memory_ids: Vec::new(),
                content_hash: None,
            };
            example.content_hash = Some(example_hash(&example));
            example
        })
        .collect();

    ParsedGuideline {
        text: candidate.draft.text(),
        id,
        slug,
        title: candidate.title,
        category: candidate.category,
        requirement: candidate.requirement,
        examples,
    }
}

/// Lower-cased title with every run of non-alphanumerics collapsed to `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for ch in title.chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug
    }
}
