use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Language tag carried by guidelines that apply to every language.
pub const GENERAL_LANGUAGE: &str = "general";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Android,
    Clang,
    Cpp,
    Dotnet,
    Golang,
    Ios,
    Java,
    Python,
    Rust,
    Typescript,
}

impl Language {
    pub const ALL: [Language; 10] = [
        Self::Android,
        Self::Clang,
        Self::Cpp,
        Self::Dotnet,
        Self::Golang,
        Self::Ios,
        Self::Java,
        Self::Python,
        Self::Rust,
        Self::Typescript,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Android => "android",
            Self::Clang => "clang",
            Self::Cpp => "cpp",
            Self::Dotnet => "dotnet",
            Self::Golang => "golang",
            Self::Ios => "ios",
            Self::Java => "java",
            Self::Python => "python",
            Self::Rust => "rust",
            Self::Typescript => "typescript",
        }
    }

    /// Name used when talking to the model about the language.
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Android => "Android",
            Self::Clang => "C",
            Self::Cpp => "C++",
            Self::Dotnet => "C#",
            Self::Golang => "Go",
            Self::Ios => "Swift",
            Self::Java => "Java",
            Self::Python => "Python",
            Self::Rust => "Rust",
            Self::Typescript => "TypeScript",
        }
    }

    /// Whether a record tagged with `language` applies to this language.
    pub fn accepts(&self, language: &str) -> bool {
        language.eq_ignore_ascii_case(self.as_str()) || language.eq_ignore_ascii_case(GENERAL_LANGUAGE)
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let lowered = raw.trim().to_ascii_lowercase();
        let language = match lowered.as_str() {
            "android" => Self::Android,
            "c" | "clang" => Self::Clang,
            "cpp" | "c++" => Self::Cpp,
            "dotnet" | "c#" | "csharp" | ".net" => Self::Dotnet,
            "golang" | "go" => Self::Golang,
            "ios" | "swift" => Self::Ios,
            "java" => Self::Java,
            "python" | "py" => Self::Python,
            "rust" | "rs" => Self::Rust,
            "typescript" | "ts" | "javascript" | "js" => Self::Typescript,
            _ => {
                let supported: Vec<&str> = Self::ALL.iter().map(Language::as_str).collect();
                return Err(format!(
                    "unsupported language '{raw}' (supported: {})",
                    supported.join(", ")
                ));
            }
        };
        Ok(language)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
