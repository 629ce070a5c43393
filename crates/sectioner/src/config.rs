use serde::{Deserialize, Serialize};

/// Configuration for sectioning behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SectionerConfig {
    /// Maximum number of lines in a section
    pub max_chunk_size: usize,

    /// Lines repeated at the start of the next section
    pub overlap: usize,

    /// Spaces per indentation level; tabs count as one full level
    pub indent_unit: usize,
}

impl Default for SectionerConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: 250,
            overlap: 10,
            indent_unit: 4,
        }
    }
}

impl SectionerConfig {
    pub fn with_limits(max_chunk_size: usize, overlap: usize) -> Self {
        Self {
            max_chunk_size,
            overlap,
            ..Default::default()
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.max_chunk_size == 0 {
            return Err("max_chunk_size must be > 0".to_string());
        }

        if self.max_chunk_size <= self.overlap {
            return Err(format!(
                "max_chunk_size ({}) must exceed overlap ({})",
                self.max_chunk_size, self.overlap
            ));
        }

        if self.indent_unit == 0 {
            return Err("indent_unit must be > 0".to_string());
        }

        Ok(())
    }
}
