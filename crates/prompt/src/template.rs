use crate::client::{ChatMessage, Role};
use crate::error::{PromptError, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// File extension appended to template names that lack one.
pub const TEMPLATE_EXTENSION: &str = "prompty";

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct TemplateHeader {
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: Vec<String>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
    model: Option<String>,
}

/// A parameterized chat prompt.
///
/// Files carry TOML front matter between `+++` lines followed by messages
/// introduced by `system:`, `user:` or `assistant:` lines. `{name}` inserts
/// an input; `{{` and `}}` are literal braces.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    pub name: String,
    pub description: String,
    pub inputs: Vec<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub model: Option<String>,
    messages: Vec<(Role, String)>,
}

/// Resolve `(folder, filename)` under `root`, appending the template extension if missing.
pub fn resolve_template_path(root: &Path, folder: &str, filename: &str) -> PathBuf {
    let file = if Path::new(filename).extension().is_some() {
        filename.to_string()
    } else {
        format!("{filename}.{TEMPLATE_EXTENSION}")
    };
    root.join(folder).join(file)
}

impl PromptTemplate {
    pub async fn load(root: &Path, folder: &str, filename: &str) -> Result<Self> {
        let path = resolve_template_path(root, folder, filename);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PromptError::TemplateNotFound { path })
            }
            Err(err) => return Err(err.into()),
        };
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(filename)
            .to_string();
        Self::parse(&stem, &raw)
    }

    pub fn parse(default_name: &str, raw: &str) -> Result<Self> {
        let raw = raw.replace("\r\n", "\n");
        let mut lines = raw.lines();
        if lines.next().map(str::trim) != Some("+++") {
            return Err(PromptError::template(default_name, "missing '+++' front matter"));
        }

        let mut header_src = String::new();
        let mut closed = false;
        for line in lines.by_ref() {
            if line.trim() == "+++" {
                closed = true;
                break;
            }
            header_src.push_str(line);
            header_src.push('\n');
        }
        if !closed {
            return Err(PromptError::template(default_name, "unterminated front matter"));
        }
        let header: TemplateHeader = toml::from_str(&header_src)
            .map_err(|err| PromptError::template(default_name, format!("front matter: {err}")))?;
        let name = header.name.clone().unwrap_or_else(|| default_name.to_string());

        let mut messages: Vec<(Role, String)> = Vec::new();
        for line in lines {
            let role = match line.trim_end() {
                "system:" => Some(Role::System),
                "user:" => Some(Role::User),
                "assistant:" => Some(Role::Assistant),
                _ => None,
            };
            match (role, messages.last_mut()) {
                (Some(role), _) => messages.push((role, String::new())),
                (None, Some((_, body))) => {
                    body.push_str(line);
                    body.push('\n');
                }
                (None, None) if line.trim().is_empty() => {}
                (None, None) => {
                    return Err(PromptError::template(
                        &name,
                        "text before the first 'system:'/'user:' marker",
                    ))
                }
            }
        }
        if messages.is_empty() {
            return Err(PromptError::template(&name, "template has no messages"));
        }
        for (_, body) in &mut messages {
            *body = body.trim().to_string();
        }

        let template = Self {
            name,
            description: header.description,
            inputs: header.inputs,
            temperature: header.temperature,
            max_tokens: header.max_tokens,
            model: header.model,
            messages,
        };
        template.check_placeholders()?;
        Ok(template)
    }

    fn check_placeholders(&self) -> Result<()> {
        let declared: BTreeSet<&str> = self.inputs.iter().map(String::as_str).collect();
        for (_, body) in &self.messages {
            for placeholder in extract_placeholders(body).map_err(|m| PromptError::template(&self.name, m))? {
                if !declared.contains(placeholder.as_str()) {
                    return Err(PromptError::template(
                        &self.name,
                        format!("placeholder '{{{placeholder}}}' is not a declared input"),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Substitute inputs. Every declared input must be given, and nothing else.
    pub fn render(&self, inputs: &BTreeMap<String, String>) -> Result<Vec<ChatMessage>> {
        for key in inputs.keys() {
            if !self.inputs.contains(key) {
                return Err(PromptError::template(
                    &self.name,
                    format!("unexpected input '{key}'"),
                ));
            }
        }
        for key in &self.inputs {
            if !inputs.contains_key(key) {
                return Err(PromptError::template(&self.name, format!("missing input '{key}'")));
            }
        }

        self.messages
            .iter()
            .map(|(role, body)| {
                let content = render_placeholders(body, |name| inputs.get(name).map(String::as_str))
                    .map_err(|m| PromptError::template(&self.name, m))?;
                Ok(ChatMessage {
                    role: *role,
                    content,
                })
            })
            .collect()
    }
}

fn extract_placeholders(template: &str) -> std::result::Result<Vec<String>, String> {
    let mut placeholders = Vec::new();
    render_placeholders(template, |name| {
        placeholders.push(name.to_string());
        Some("")
    })?;
    Ok(placeholders)
}

fn render_placeholders<'a>(
    template: &str,
    mut resolve: impl FnMut(&str) -> Option<&'a str>,
) -> std::result::Result<String, String> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '{' => {
                if matches!(chars.peek(), Some('{')) {
                    let _ = chars.next();
                    out.push('{');
                    continue;
                }

                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') => return Err("nested '{' inside placeholder".into()),
                        Some(c) => name.push(c),
                        None => return Err("unterminated '{...}' placeholder".into()),
                    }
                }

                let name = name.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                    return Err(format!("invalid placeholder '{{{name}}}'"));
                }
                out.push_str(resolve(name).unwrap_or(""));
            }
            '}' => {
                if matches!(chars.peek(), Some('}')) {
                    let _ = chars.next();
                    out.push('}');
                    continue;
                }
                return Err("stray '}'".into());
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "+++\ndescription = \"demo\"\ninputs = [\"language\", \"content\"]\ntemperature = 0.0\n+++\nsystem:\nYou review {language} APIs. Reply as {{\"comments\": []}}.\n\nuser:\n{content}\n";

    fn inputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn parses_and_renders_messages() {
        let template = PromptTemplate::parse("demo", SAMPLE).unwrap();
        assert_eq!(template.name, "demo");
        assert_eq!(template.temperature, Some(0.0));

        let messages = template
            .render(&inputs(&[("language", "Python"), ("content", "1: class A:")]))
            .unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "You review Python APIs. Reply as {\"comments\": []}.");
        assert_eq!(messages[1].content, "1: class A:");
    }

    #[test]
    fn render_rejects_missing_and_unexpected_inputs() {
        let template = PromptTemplate::parse("demo", SAMPLE).unwrap();
        assert!(template.render(&inputs(&[("language", "Python")])).is_err());
        assert!(template
            .render(&inputs(&[("language", "x"), ("content", "y"), ("extra", "z")]))
            .is_err());
    }

    #[test]
    fn undeclared_placeholder_is_rejected_at_parse() {
        let raw = "+++\ninputs = []\n+++\nuser:\n{content}\n";
        assert!(PromptTemplate::parse("bad", raw).is_err());
    }

    #[test]
    fn front_matter_is_required() {
        assert!(PromptTemplate::parse("bad", "user:\nhello\n").is_err());
        assert!(PromptTemplate::parse("bad", "+++\ninputs = []\nuser:\nhi\n").is_err());
    }

    #[test]
    fn extension_is_appended_when_missing() {
        let root = Path::new("/prompts");
        assert_eq!(
            resolve_template_path(root, "api_review", "guideline_review"),
            PathBuf::from("/prompts/api_review/guideline_review.prompty")
        );
        assert_eq!(
            resolve_template_path(root, "api_review", "x.prompty"),
            PathBuf::from("/prompts/api_review/x.prompty")
        );
    }

    #[tokio::test]
    async fn missing_template_fails_fast() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let err = PromptTemplate::load(dir.path(), "api_review", "nope").await.unwrap_err();
        assert!(matches!(err, PromptError::TemplateNotFound { .. }));
    }
}
