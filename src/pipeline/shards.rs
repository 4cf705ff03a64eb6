//! Token shard files
//!
//! One gzip TSV file per shard, one line per token:
//! `article  section  paragraph  sentence  start  end  value  pos  lemma  before  after`.
//! Paragraphs of article `a` live in shard `a % shard_count`, in the order
//! they were written.

use super::{PipelineError, PipelineResult};
use crate::storage::ParagraphKey;
use crate::tokenize::{Sentence, Token};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const COLUMNS: usize = 11;

pub fn shard_path(dir: &Path, index: usize) -> PathBuf {
    dir.join(format!("tokens_{}.gz", index))
}

pub fn shard_of(article_id: u64, shard_count: usize) -> usize {
    (article_id % shard_count as u64) as usize
}

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

/// Appends tokenized paragraphs to one shard
pub struct ShardWriter {
    out: GzEncoder<BufWriter<File>>,
    paragraphs: u64,
}

impl ShardWriter {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            out: GzEncoder::new(BufWriter::new(file), Compression::default()),
            paragraphs: 0,
        })
    }

    pub fn write_paragraph(&mut self, key: &ParagraphKey, sentences: &[Sentence]) -> io::Result<()> {
        for (sentence_index, sentence) in sentences.iter().enumerate() {
            for token in sentence {
                writeln!(
                    self.out,
                    "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                    key.article_id,
                    key.section_index,
                    key.paragraph_index,
                    sentence_index,
                    token.start,
                    token.end,
                    clean(&token.value),
                    clean(token.pos.as_deref().unwrap_or("")),
                    clean(token.lemma.as_deref().unwrap_or("")),
                    clean(&token.before),
                    clean(&token.after),
                )?;
            }
        }
        self.paragraphs += 1;
        Ok(())
    }

    /// Flush and close; returns the number of paragraphs written
    pub fn finish(self) -> io::Result<u64> {
        let mut inner = self.out.finish()?;
        inner.flush()?;
        Ok(self.paragraphs)
    }
}

struct Row {
    key: ParagraphKey,
    sentence_index: usize,
    token: Token,
}

/// Reads a shard back as `(paragraph key, sentences)` in file order
pub struct ShardReader<R: BufRead> {
    source: R,
    line: u64,
    peeked: Option<Row>,
    buf: String,
}

impl ShardReader<BufReader<MultiGzDecoder<File>>> {
    pub fn open(path: impl AsRef<Path>) -> PipelineResult<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(MultiGzDecoder::new(file))))
    }
}

impl<R: BufRead> ShardReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            line: 0,
            peeked: None,
            buf: String::new(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> PipelineError {
        PipelineError::MalformedShard {
            line: self.line,
            reason: reason.into(),
        }
    }

    fn read_row(&mut self) -> PipelineResult<Option<Row>> {
        self.buf.clear();
        if self.source.read_line(&mut self.buf)? == 0 {
            return Ok(None);
        }
        self.line += 1;

        let line = self.buf.strip_suffix('\n').unwrap_or(&self.buf);
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != COLUMNS {
            return Err(self.malformed(format!("expected {} columns, found {}", COLUMNS, fields.len())));
        }

        let number = |i: usize| -> PipelineResult<usize> {
            fields[i].parse().map_err(|_| PipelineError::MalformedShard {
                line: self.line,
                reason: format!("column {} is not a number: {:?}", i, fields[i]),
            })
        };
        let optional = |i: usize| (!fields[i].is_empty()).then(|| fields[i].to_string());

        let token = Token {
            start: number(4)?,
            end: number(5)?,
            value: fields[6].to_string(),
            pos: optional(7),
            lemma: optional(8),
            before: fields[9].to_string(),
            after: fields[10].to_string(),
        };
        Ok(Some(Row {
            key: ParagraphKey::paragraph(number(0)? as u64, number(1)?, number(2)?),
            sentence_index: number(3)?,
            token,
        }))
    }
}

impl<R: BufRead> Iterator for ShardReader<R> {
    type Item = PipelineResult<(ParagraphKey, Vec<Sentence>)>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.peeked.take() {
            Some(row) => row,
            None => match self.read_row() {
                Ok(Some(row)) => row,
                Ok(None) => return None,
                Err(e) => return Some(Err(e)),
            },
        };
        if first.sentence_index != 0 {
            return Some(Err(self.malformed("paragraph does not start with sentence 0")));
        }

        let key = first.key;
        let mut sentences = vec![vec![first.token]];
        loop {
            match self.read_row() {
                Ok(Some(row)) if row.key == key => {
                    let current = sentences.len() - 1;
                    if row.sentence_index == current {
                        sentences[current].push(row.token);
                    } else if row.sentence_index == current + 1 {
                        sentences.push(vec![row.token]);
                    } else {
                        return Some(Err(self.malformed("sentence indices are not consecutive")));
                    }
                }
                Ok(Some(row)) => {
                    self.peeked = Some(row);
                    break;
                }
                Ok(None) => break,
                Err(e) => return Some(Err(e)),
            }
        }

        Some(Ok((key, sentences)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenize::{SimpleTokenizer, Tokenizer};

    #[test]
    fn shards_read_back_paragraph_by_paragraph() {
        let dir = tempfile::tempdir().unwrap();
        let path = shard_path(dir.path(), 1);

        let first = SimpleTokenizer.split("Hermes is a god. He\tflies.").unwrap();
        let mut second = SimpleTokenizer.split("Mercury orbits.").unwrap();
        second[0][0].pos = Some("NNP".into());

        let mut writer = ShardWriter::create(&path).unwrap();
        writer.write_paragraph(&ParagraphKey::paragraph(5, 0, 0), &first).unwrap();
        writer.write_paragraph(&ParagraphKey::paragraph(5, 1, 3), &second).unwrap();
        assert_eq!(writer.finish().unwrap(), 2);

        let paragraphs: Vec<(ParagraphKey, Vec<Sentence>)> =
            ShardReader::open(&path).unwrap().collect::<PipelineResult<_>>().unwrap();
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].0, ParagraphKey::paragraph(5, 0, 0));
        assert_eq!(paragraphs[0].1.len(), 2);
        assert_eq!(paragraphs[0].1[0][3].value, "god");
        assert_eq!(paragraphs[0].1[1][0].before, " ");
        assert_eq!(paragraphs[1].0, ParagraphKey::paragraph(5, 1, 3));
        assert_eq!(paragraphs[1].1[0][0].pos.as_deref(), Some("NNP"));
        assert_eq!(paragraphs[1].1[0][1].pos, None);
    }

    #[test]
    fn rejects_skipped_sentence() {
        let data = "1\t0\t0\t0\t0\t1\ta\t\t\t\t \n1\t0\t0\t2\t2\t3\tb\t\t\t \t\n";
        let mut reader = ShardReader::new(data.as_bytes());
        assert!(matches!(reader.next(), Some(Err(PipelineError::MalformedShard { line: 2, .. }))));
    }

    #[test]
    fn shard_assignment_is_by_article_id() {
        assert_eq!(shard_of(9, 4), 1);
        assert_eq!(shard_of(12, 4), 0);
    }
}
