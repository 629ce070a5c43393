//! # APIView Sectioner
//!
//! Splits an API surface (or a diff between two surfaces) into overlapping,
//! indentation-respecting line windows that are reviewed one at a time.
//!
//! ```text
//! target [+ base]
//!     │
//!     ├──> line-aligned diff (similar) → +/-/unchanged marks
//!     │
//!     ├──> LineData (line_no, indent, text, diff_mark)
//!     │
//!     └──> Sections (≤ max_chunk_size lines, cut at block boundaries,
//!          next section starts `overlap` lines before the cut)
//! ```
//!
//! ## Example
//!
//! ```rust
//! use apiview_sectioner::{SectionedDocument, SectionerConfig};
//!
//! let doc = SectionedDocument::from_diff(
//!     "class A:\n    pass\n",
//!     "class A:\n    def GetThing(self): pass\n    pass\n",
//!     SectionerConfig::default(),
//! )
//! .unwrap();
//! assert_eq!(doc.sections().len(), 1);
//! assert!(doc.sections()[0].numbered().contains("2: +    def GetThing"));
//! ```

mod config;
mod diff;
mod document;
mod error;
mod types;

pub use config::SectionerConfig;
pub use diff::{diff_lines, plain_lines, tagged_lines, DiffLine};
pub use document::SectionedDocument;
pub use error::{Result, SectionerError};
pub use types::{DiffMark, LineData, Section};
