//! Paragraph stream ⋈ example-info stream

use super::{PipelineError, PipelineResult};
use crate::storage::{ExampleInfo, ParagraphKey};
use tracing::debug;

type Position = (u64, usize, usize);

fn key_of(position: Position) -> ParagraphKey {
    ParagraphKey::paragraph(position.0, position.1, position.2)
}

/// Matches the paragraphs of one token shard with their example infos.
///
/// Both sides must arrive in ascending `(article, section, paragraph)` order;
/// anything else is a [`PipelineError::JoinOrder`]. Infos whose paragraph
/// never shows up are counted as misses.
pub struct InfoJoin<I: Iterator<Item = ExampleInfo>> {
    infos: I,
    lookahead: Option<ExampleInfo>,
    last_info: Option<ParagraphKey>,
    last_paragraph: Option<Position>,
    misses: u64,
}

impl<I: Iterator<Item = ExampleInfo>> InfoJoin<I> {
    pub fn new(infos: I) -> Self {
        Self {
            infos,
            lookahead: None,
            last_info: None,
            last_paragraph: None,
            misses: 0,
        }
    }

    fn pull(&mut self) -> PipelineResult<Option<ExampleInfo>> {
        if let Some(info) = self.lookahead.take() {
            return Ok(Some(info));
        }
        let Some(info) = self.infos.next() else {
            return Ok(None);
        };
        if let Some(previous) = self.last_info {
            if info.key < previous {
                return Err(PipelineError::JoinOrder {
                    previous,
                    next: info.key,
                });
            }
        }
        self.last_info = Some(info.key);
        Ok(Some(info))
    }

    /// Infos of the paragraph at `position`; infos of earlier paragraphs
    /// still pending are dropped as misses.
    pub fn take(&mut self, position: Position) -> PipelineResult<Vec<ExampleInfo>> {
        if let Some(previous) = self.last_paragraph {
            if position < previous {
                return Err(PipelineError::JoinOrder {
                    previous: key_of(previous),
                    next: key_of(position),
                });
            }
        }
        self.last_paragraph = Some(position);

        let mut matched = Vec::new();
        while let Some(info) = self.pull()? {
            let info_position = info.key.paragraph_position();
            if info_position > position {
                self.lookahead = Some(info);
                break;
            }
            if info_position == position {
                matched.push(info);
            } else {
                debug!(key = ?info.key, sense_id = info.sense_id, "no paragraph for example info");
                self.misses += 1;
            }
        }
        Ok(matched)
    }

    /// Misses so far plus every info left unread
    pub fn finish(mut self) -> u64 {
        let left = self.lookahead.take().into_iter().count() as u64 + self.infos.by_ref().count() as u64;
        self.misses + left
    }
}
