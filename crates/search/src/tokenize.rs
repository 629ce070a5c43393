/// Lower-cased word tokens. Identifiers also contribute their camelCase and
/// snake_case parts, so `GetThing` yields `getthing`, `get`, `thing`.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !(c.is_alphanumeric() || c == '_')) {
        let trimmed = word.trim_matches('_');
        if trimmed.is_empty() {
            continue;
        }
        let lowered = trimmed.to_lowercase();
        let parts = identifier_parts(trimmed);
        tokens.push(lowered.clone());
        if parts.len() > 1 {
            tokens.extend(parts.into_iter().filter(|p| *p != lowered));
        }
    }
    tokens
}

fn identifier_parts(word: &str) -> Vec<String> {
    let mut parts = Vec::new();
    for piece in word.split('_').filter(|p| !p.is_empty()) {
        let chars: Vec<char> = piece.chars().collect();
        let mut current = String::new();
        for (i, &ch) in chars.iter().enumerate() {
            let boundary = i > 0
                && ch.is_uppercase()
                && (chars[i - 1].is_lowercase()
                    || chars[i - 1].is_ascii_digit()
                    || chars.get(i + 1).is_some_and(|n| n.is_lowercase()) && chars[i - 1].is_uppercase());
            if boundary && !current.is_empty() {
                parts.push(current.to_lowercase());
                current.clear();
            }
            current.push(ch);
        }
        if !current.is_empty() {
            parts.push(current.to_lowercase());
        }
    }
    parts
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn splits_camel_and_snake_identifiers() {
        assert_eq!(tokenize("GetThing"), vec!["getthing", "get", "thing"]);
        assert_eq!(tokenize("get_thing()"), vec!["get_thing", "get", "thing"]);
        assert_eq!(tokenize("HTTPClient"), vec!["httpclient", "http", "client"]);
    }

    #[test]
    fn ignores_punctuation() {
        assert_eq!(tokenize("def a(self): pass"), vec!["def", "a", "self", "pass"]);
        assert!(tokenize("  ,;  ").is_empty());
    }
}
