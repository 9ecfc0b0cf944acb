//! mf-source: where media comes from.
//!
//! - [`StreamSource`] -- the provider seam (metadata + rendition bytes).
//! - [`YtDlpSource`] -- production provider backed by yt-dlp and reqwest.
//! - [`CatalogResolver`] -- URL validation and catalog shaping.
//! - [`sanitize_stem`] -- download filename derivation.

pub mod filename;
pub mod resolver;
pub mod source;
pub mod url;
pub mod ytdlp;

pub use filename::{sanitize_stem, with_extension};
pub use resolver::{CatalogResolver, MediaCatalog};
pub use source::{ByteStream, SourceMetadata, StreamSource};
pub use url::SourceRef;
pub use ytdlp::YtDlpSource;
