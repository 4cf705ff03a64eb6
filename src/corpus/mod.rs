//! Corpus reader
//!
//! Streams pages out of a (bz2-compressed) XML dump and separates redirect
//! pages from article pages.

pub mod reader;
pub mod redirect;

pub use reader::{DumpPage, DumpReader, DumpSource, RawPage, ReadProgress, RedirectPage};
pub use redirect::{detect_redirect, RedirectTarget};

/// Errors while reading a dump
#[derive(Debug, thiserror::Error)]
pub enum CorpusError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("malformed page {title:?}: {reason}")]
    MalformedPage { title: String, reason: String },
}

pub type CorpusResult<T> = Result<T, CorpusError>;
