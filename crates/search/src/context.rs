use apiview_protocol::{Example, Guideline, Memory};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;

/// Evidence bundle handed to review prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    pub guidelines: Vec<Guideline>,
    pub examples: Vec<Example>,
    pub memories: Vec<Memory>,
    /// Referenced ids that could not be loaded
    #[serde(default)]
    pub unresolved: Vec<String>,
}

impl Context {
    pub fn is_empty(&self) -> bool {
        self.guidelines.is_empty() && self.examples.is_empty() && self.memories.is_empty()
    }

    pub fn guideline_ids(&self) -> BTreeSet<&str> {
        self.guidelines.iter().map(|g| g.id.as_str()).collect()
    }

    pub fn memory_ids(&self) -> BTreeSet<&str> {
        self.memories.iter().map(|m| m.id.as_str()).collect()
    }

    /// Render as Markdown for prompt injection.
    pub fn to_markdown(&self) -> String {
        if self.is_empty() {
            return "No relevant guidelines, examples or memories were found.\n".to_string();
        }

        let mut out = String::new();
        let mut shown_examples = BTreeSet::new();

        if !self.guidelines.is_empty() {
            out.push_str("## Guidelines\n\n");
            for g in &self.guidelines {
                let _ = writeln!(out, "### {}: {}", g.id, g.title);
                if let Some(req) = g.requirement {
                    let _ = writeln!(out, "Requirement: {}", format!("{req:?}").to_uppercase());
                }
                let _ = writeln!(out, "{}\n", g.text.trim());
                for example in self.examples.iter().filter(|e| g.examples.contains(&e.id)) {
                    render_example(&mut out, example);
                    shown_examples.insert(example.id.as_str());
                }
            }
        }

        let rest: Vec<&Example> = self
            .examples
            .iter()
            .filter(|e| !shown_examples.contains(e.id.as_str()))
            .collect();
        if !rest.is_empty() {
            out.push_str("## Examples\n\n");
            for example in rest {
                render_example(&mut out, example);
            }
        }

        if !self.memories.is_empty() {
            out.push_str("## Memories\n\n");
            for m in &self.memories {
                let heading = if m.title.is_empty() { "memory" } else { m.title.as_str() };
                let _ = writeln!(out, "### {}: {}", m.id, heading);
                let _ = writeln!(out, "{}\n", m.text.trim());
                if !m.related_guideline_ids.is_empty() {
                    let _ = writeln!(out, "Related guidelines: {}\n", m.related_guideline_ids.join(", "));
                }
            }
        }
        out
    }
}

fn render_example(out: &mut String, example: &Example) {
    let _ = writeln!(out, "#### Example {}", example.id);
    if !example.comment.trim().is_empty() {
        let _ = writeln!(out, "{}", example.comment.trim());
    }
    if let Some(bad) = &example.bad_code {
        let _ = writeln!(out, "Bad:\n```\n{}\n```", bad.trim_end());
    }
    if let Some(good) = &example.good_code {
        let _ = writeln!(out, "Good:\n```\n{}\n```", good.trim_end());
    }
    out.push('\n');
}
