//! Epubime
//!
//! A Rust library for reading EPUB eBook files.
//!
//! This library parses EPUB 2 and EPUB 3 publications: the OCF container,
//! the package document (metadata, manifest, spine), the NCX and the EPUB 3
//! navigation document (table of contents, landmarks, page list). It gives
//! access to every declared resource, removes font obfuscation, and can keep
//! going past broken parts of a publication when asked to.
//!
//! ## Features
//!
//! - Parse EPUB file structure and containers, extract metadata, access resource files.
//! - Strict or lenient parsing, with diagnostics of everything that was skipped.
//! - Automatic handling of obfuscated fonts.
//! - Path validation on every archive read.
//! - A process-wide cache of parsed books.
//! - Batch processing of many files on a rayon pool via the `batch` feature.
//!
//! ## Quick Start
//!
//! ### Read EPUB Files
//!
//! ```rust, ignore
//! # use epubime::epub::EpubDoc;
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Open EPUB file
//! let mut doc = EpubDoc::new("path/to/epub/file.epub")?;
//!
//! // Get metadata
//! println!("Title: {:?}", doc.get_title()?);
//! println!("Creator: {:?}", doc.get_metadata_value("creator"));
//!
//! // Read content
//! let (_content, _mime) = doc.spine_current().ok_or("empty spine")?;
//! let (_content, _mime) = doc.spine_next().ok_or("last chapter")?;
//!
//! # Ok(())
//! # }
//! ```
//!
//! ### Parse leniently
//!
//! ```rust, ignore
//! # use epubime::{options::ParseOptions, reader::EpubReader};
//! let result = EpubReader::from_path("path/to/broken.epub")
//!     .with_options(ParseOptions::lenient())
//!     .parse_with_result();
//!
//! println!("{:?}: {}", result.status, result.diagnostics.summary());
//! ```
//!
//! ## Feature flags
//!
//! - `batch` (default): Enable `epubime::processor`, and parallel resource
//!   processing in [EpubReader](reader::EpubReader). Pulls in `rayon` and `walkdir`.

pub(crate) mod utils;

pub mod book;
pub mod cache;
pub mod diagnostics;
pub mod epub;
pub mod error;
pub mod metadata;
pub mod options;
#[cfg(feature = "batch")]
pub mod processor;
pub mod reader;
pub mod types;
pub mod validation;

#[cfg(test)]
mod fixtures;

pub use book::EpubBook;
pub use epub::EpubDoc;
pub use error::{EpubError, ErrorCode};
pub use options::{ErrorHandlingStrategy, ParseOptions, ReaderConfig};
pub use reader::{EpubInfo, EpubReader};
pub use utils::{DecodeBytes, sniff_media_type};
