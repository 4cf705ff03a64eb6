//! Streaming XML dump reader
//!
//! The dump is decompressed in fixed-size chunks and fed to an incremental
//! XML parser, so the first pages are available long before the whole file
//! has been read.

use super::redirect::{detect_redirect, RedirectTarget};
use super::{CorpusError, CorpusResult};
use bzip2::read::MultiBzDecoder;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// A page as it appears in the dump (first revision only)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub id: u64,
    pub title: String,
    pub namespace: i64,
    pub text: String,
    pub model: Option<String>,
    pub format: Option<String>,
}

impl RawPage {
    pub fn is_wikitext(&self) -> bool {
        self.model.as_deref() == Some("wikitext") && self.format.as_deref() == Some("text/x-wiki")
    }
}

/// A redirect page; its text is never parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPage {
    pub id: u64,
    pub title: String,
    pub namespace: i64,
    pub target: RedirectTarget,
}

/// What the reader hands downstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpPage {
    Article(RawPage),
    Redirect(RedirectPage),
}

impl DumpPage {
    pub fn id(&self) -> u64 {
        match self {
            DumpPage::Article(page) => page.id,
            DumpPage::Redirect(page) => page.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            DumpPage::Article(page) => &page.title,
            DumpPage::Redirect(page) => &page.title,
        }
    }

    fn classify(page: RawPage) -> Self {
        match detect_redirect(&page.text) {
            Some(target) => DumpPage::Redirect(RedirectPage {
                id: page.id,
                title: page.title,
                namespace: page.namespace,
                target,
            }),
            None => DumpPage::Article(page),
        }
    }
}

/// Shared read position of a dump
///
/// Cloned handles observe the same counters, so a progress reporter can
/// watch a reader that has moved into another task.
#[derive(Debug, Clone)]
pub struct ReadProgress {
    consumed: Arc<AtomicU64>,
    total: u64,
}

impl ReadProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            consumed: Arc::new(AtomicU64::new(0)),
            total: total_bytes,
        }
    }

    /// Compressed bytes read so far; never decreases
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.total
    }

    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.bytes_consumed() as f64 / self.total as f64).min(1.0)
    }

    fn record(&self, bytes: usize) {
        self.consumed.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

/// Counts the raw bytes pulled from the underlying file
pub struct CountingReader<R> {
    inner: R,
    progress: ReadProgress,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, progress: ReadProgress) -> Self {
        Self { inner, progress }
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.progress.record(n);
        Ok(n)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Title,
    Namespace,
    Id,
    Model,
    Format,
    Text,
}

#[derive(Default)]
struct PageBuilder {
    title: String,
    namespace: String,
    id: String,
    model: Option<String>,
    format: Option<String>,
    text: String,
    revisions: usize,
}

impl PageBuilder {
    fn push(&mut self, field: Field, value: &str) {
        match field {
            Field::Title => self.title.push_str(value),
            Field::Namespace => self.namespace.push_str(value),
            Field::Id => self.id.push_str(value),
            Field::Model => self.model.get_or_insert_with(String::new).push_str(value),
            Field::Format => self.format.get_or_insert_with(String::new).push_str(value),
            Field::Text => self.text.push_str(value),
        }
    }

    fn finish(self) -> CorpusResult<RawPage> {
        let id = self.id.trim().parse::<u64>().map_err(|_| CorpusError::MalformedPage {
            title: self.title.clone(),
            reason: format!("invalid page id {:?}", self.id),
        })?;
        let namespace = self
            .namespace
            .trim()
            .parse::<i64>()
            .map_err(|_| CorpusError::MalformedPage {
                title: self.title.clone(),
                reason: format!("invalid namespace {:?}", self.namespace),
            })?;

        Ok(RawPage {
            id,
            title: self.title,
            namespace,
            text: self.text,
            model: self.model,
            format: self.format,
        })
    }
}

/// A boxed dump source, so plain and compressed files share one reader type
pub type DumpSource = Box<dyn BufRead + Send>;

/// Lazy, finite, non-restartable sequence of dump pages
pub struct DumpReader<R: BufRead> {
    xml: Reader<R>,
    progress: ReadProgress,
    namespaces: HashSet<i64>,
    finished: bool,
    skipped_non_wikitext: u64,
}

impl DumpReader<DumpSource> {
    /// Open a dump file; `.bz2` files are decompressed on the fly.
    pub fn open(
        path: impl AsRef<Path>,
        chunk_size: usize,
        namespaces: HashSet<i64>,
    ) -> CorpusResult<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let progress = ReadProgress::new(file.metadata()?.len());
        let counted = CountingReader::new(file, progress.clone());

        let is_bz2 = path.extension().is_some_and(|ext| ext == "bz2");
        let source: DumpSource = if is_bz2 {
            Box::new(BufReader::with_capacity(chunk_size, MultiBzDecoder::new(counted)))
        } else {
            Box::new(BufReader::with_capacity(chunk_size, counted))
        };

        Ok(Self::new(source, progress, namespaces))
    }
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(source: R, progress: ReadProgress, namespaces: HashSet<i64>) -> Self {
        Self {
            xml: Reader::from_reader(source),
            progress,
            namespaces,
            finished: false,
            skipped_non_wikitext: 0,
        }
    }

    pub fn progress(&self) -> ReadProgress {
        self.progress.clone()
    }

    pub fn skipped_non_wikitext(&self) -> u64 {
        self.skipped_non_wikitext
    }

    /// Read the next `<page>` element, whatever its namespace.
    fn next_raw(&mut self) -> CorpusResult<Option<RawPage>> {
        let mut buf = Vec::new();
        let mut page: Option<PageBuilder> = None;
        let mut depth = 0usize;
        let mut in_revision = false;
        let mut field: Option<Field> = None;

        loop {
            match self.xml.read_event_into(&mut buf)? {
                Event::Start(e) => {
                    let name = e.local_name();
                    let name = name.as_ref();
                    match page.as_mut() {
                        None => {
                            if name == b"page" {
                                page = Some(PageBuilder::default());
                                depth = 0;
                            }
                        }
                        Some(builder) => {
                            depth += 1;
                            field = match (depth, name) {
                                (1, b"title") => Some(Field::Title),
                                (1, b"ns") => Some(Field::Namespace),
                                (1, b"id") => Some(Field::Id),
                                (1, b"revision") => {
                                    in_revision = builder.revisions == 0;
                                    None
                                }
                                (2, b"model") if in_revision => Some(Field::Model),
                                (2, b"format") if in_revision => Some(Field::Format),
                                (2, b"text") if in_revision => Some(Field::Text),
                                _ => None,
                            };
                        }
                    }
                }
                Event::End(e) => {
                    if page.is_some() {
                        if depth == 0 {
                            if let Some(finished) = page.take() {
                                return finished.finish().map(Some);
                            }
                        }
                        if depth == 1 && e.local_name().as_ref() == b"revision" {
                            if let Some(builder) = page.as_mut() {
                                builder.revisions += 1;
                            }
                            in_revision = false;
                        }
                        depth -= 1;
                        field = None;
                    }
                }
                Event::Text(e) => {
                    if let (Some(builder), Some(field)) = (page.as_mut(), field) {
                        builder.push(field, &e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let (Some(builder), Some(field)) = (page.as_mut(), field) {
                        builder.push(field, &String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::Eof => {
                    return match page {
                        Some(builder) => Err(CorpusError::MalformedPage {
                            title: builder.title,
                            reason: "dump ended inside a page".to_string(),
                        }),
                        None => Ok(None),
                    };
                }
                _ => {}
            }
            buf.clear();
        }
    }
}

impl<R: BufRead> Iterator for DumpReader<R> {
    type Item = CorpusResult<DumpPage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let page = match self.next_raw() {
                Ok(Some(page)) => page,
                Ok(None) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            if !self.namespaces.contains(&page.namespace) {
                continue;
            }

            if page.namespace == 0 && !page.is_wikitext() {
                info!(
                    page_id = page.id,
                    title = %page.title,
                    model = ?page.model,
                    format = ?page.format,
                    "skipping page that is not wikitext"
                );
                self.skipped_non_wikitext += 1;
                continue;
            }

            return Some(Ok(DumpPage::classify(page)));
        }
    }
}
