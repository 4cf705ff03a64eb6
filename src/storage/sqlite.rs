//! SQLite knowledge base

use super::records::{
    Dataset, ExampleInfo, KnowledgeBaseStats, PageBatch, ParagraphKey,
};
use super::traits::{AmbiguousGroup, SenseLocation, SenseLookup, StorageError, StorageResult};
use crate::category::CategoryGraph;
use crate::corpus::RedirectTarget;
use crate::inventory::{
    GroupMention, InventoryInput, PageLink, SectionOutline, SenseInventory,
};
use crate::partition::{Partition, SenseParagraphs};
use crate::resolve::{subtree_totals, LinkResolver, ResolvedTarget, Unresolved};
use crate::title::group_title;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

const BUILD_STATE_KEY: &str = "build_state";
const BUILT_AT_KEY: &str = "built_at";

/// Tables emptied at the start of every build
const BUILD_TABLES: &[&str] = &[
    "articles",
    "sections",
    "section_ids",
    "paragraphs",
    "raw_links",
    "links",
    "categories",
    "subcategories",
    "article_categories",
    "sense_groups",
    "targets",
    "senses",
    "alternative_group_titles",
    "data",
];

/// Lifecycle of the knowledge base contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    InProgress,
    Complete,
}

impl BuildState {
    fn as_str(&self) -> &'static str {
        match self {
            BuildState::InProgress => "in_progress",
            BuildState::Complete => "complete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "in_progress" => Some(BuildState::InProgress),
            "complete" => Some(BuildState::Complete),
            _ => None,
        }
    }
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters of the link resolution pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkResolution {
    pub resolved: u64,
    pub unknown_article: u64,
    pub unknown_section: u64,
}

fn section_to_sql(section: Option<usize>) -> i64 {
    section.map_or(-1, |index| index as i64)
}

fn section_from_sql(value: i64) -> Option<usize> {
    (value >= 0).then_some(value as usize)
}

/// SQLite-backed knowledge base
///
/// One database file holds articles, sections, links, the category tables,
/// the sense inventory and the example assignments. Thread-safe via an
/// internal mutex on the connection; the build pipeline funnels all writes
/// through a single writer.
pub struct KnowledgeBase {
    conn: Mutex<Connection>,
}

impl KnowledgeBase {
    /// Open or create a knowledge base at the given path
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory knowledge base (useful for testing)
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS kb_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Articles and redirects; redirects carry their target
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                group_title TEXT NOT NULL,
                redirect_article_title TEXT,
                redirect_section_id TEXT,
                is_disambig INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_articles_title ON articles(title);
            CREATE INDEX IF NOT EXISTS idx_articles_group_title ON articles(group_title);

            CREATE TABLE IF NOT EXISTS sections (
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                parent_index INTEGER,
                level INTEGER NOT NULL,
                title TEXT,
                paragraph_count INTEGER NOT NULL DEFAULT 0,
                total_paragraph_count INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (article_id, section_index)
            );

            CREATE TABLE IF NOT EXISTS section_ids (
                article_id INTEGER NOT NULL,
                id_string TEXT NOT NULL,
                section_index INTEGER NOT NULL,
                PRIMARY KEY (article_id, id_string)
            );

            -- Paragraphs with enough tokens to count
            CREATE TABLE IF NOT EXISTS paragraphs (
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                paragraph_index INTEGER NOT NULL,
                sentence_count INTEGER NOT NULL,
                token_count INTEGER NOT NULL,
                PRIMARY KEY (article_id, section_index, paragraph_index)
            );

            -- Links before their targets are known
            CREATE TABLE IF NOT EXISTS raw_links (
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                paragraph_index INTEGER NOT NULL,
                sentence_index INTEGER NOT NULL,
                start_index INTEGER NOT NULL,
                end_index INTEGER NOT NULL,
                target_article TEXT NOT NULL,
                target_section TEXT,
                link_title TEXT NOT NULL
            );

            -- linked_section_index -1 is the whole article
            CREATE TABLE IF NOT EXISTS links (
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                paragraph_index INTEGER NOT NULL,
                sentence_index INTEGER NOT NULL,
                start_index INTEGER NOT NULL,
                end_index INTEGER NOT NULL,
                linked_article_id INTEGER NOT NULL,
                linked_section_index INTEGER NOT NULL,
                link_title TEXT NOT NULL,
                group_title TEXT NOT NULL,
                is_on_disambig INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_links_target
                ON links(linked_article_id, linked_section_index);
            CREATE INDEX IF NOT EXISTS idx_links_group_title ON links(group_title);

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS subcategories (
                category_id INTEGER NOT NULL,
                subcategory_id INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS article_categories (
                article_id INTEGER NOT NULL,
                category_id INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sense_groups (
                id INTEGER PRIMARY KEY,
                title TEXT NOT NULL,
                evidence INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS targets (
                id INTEGER PRIMARY KEY,
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                evidence INTEGER NOT NULL
            );
            -- senses.id is the sense id used by examples and serving
            CREATE TABLE IF NOT EXISTS senses (
                id INTEGER PRIMARY KEY,
                group_id INTEGER NOT NULL,
                target_id INTEGER NOT NULL,
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                on_disambig INTEGER NOT NULL,
                volume INTEGER NOT NULL,
                matching_count INTEGER NOT NULL,
                other_count INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_senses_group ON senses(group_id);
            CREATE TABLE IF NOT EXISTS alternative_group_titles (
                title TEXT PRIMARY KEY,
                group_id INTEGER NOT NULL
            );

            -- One row per (sense, paragraph or sentence); dataset 0 = train
            CREATE TABLE IF NOT EXISTS data (
                article_id INTEGER NOT NULL,
                section_index INTEGER NOT NULL,
                paragraph_index INTEGER NOT NULL,
                sentence_index INTEGER,
                sense_id INTEGER NOT NULL,
                dataset INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_data_position
                ON data(article_id, section_index, paragraph_index);

            -- Enable WAL mode for concurrent reads during writes
            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    // === Build lifecycle ===

    /// Empty every table and mark the build as in progress
    pub fn begin_build(&self) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for table in BUILD_TABLES {
            tx.execute(&format!("DELETE FROM {}", table), [])?;
        }
        tx.execute("DELETE FROM kb_meta WHERE key = ?1", params![BUILT_AT_KEY])?;
        Self::set_meta(&tx, BUILD_STATE_KEY, BuildState::InProgress.as_str())?;
        tx.commit()?;
        info!("knowledge base build started");
        Ok(())
    }

    /// Mark the build as complete
    pub fn finish_build(&self) -> StorageResult<DateTime<Utc>> {
        let built_at = Utc::now();
        let conn = self.conn.lock().unwrap();
        Self::set_meta(&conn, BUILD_STATE_KEY, BuildState::Complete.as_str())?;
        Self::set_meta(&conn, BUILT_AT_KEY, &built_at.to_rfc3339())?;
        info!(%built_at, "knowledge base build complete");
        Ok(built_at)
    }

    pub fn build_state(&self) -> StorageResult<Option<BuildState>> {
        let conn = self.conn.lock().unwrap();
        let value = Self::meta(&conn, BUILD_STATE_KEY)?;
        Ok(value.as_deref().and_then(BuildState::parse))
    }

    pub fn built_at(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let Some(value) = Self::meta(&conn, BUILT_AT_KEY)? else {
            return Ok(None);
        };
        let built_at = DateTime::parse_from_rfc3339(&value)
            .map_err(|e| StorageError::DateParse(e.to_string()))?
            .with_timezone(&Utc);
        Ok(Some(built_at))
    }

    /// Fail unless the last build ran to completion
    pub fn ensure_complete(&self) -> StorageResult<()> {
        match self.build_state()? {
            Some(BuildState::Complete) => Ok(()),
            Some(state) => Err(StorageError::IncompleteBuild(state.to_string())),
            None => Err(StorageError::IncompleteBuild("missing".to_string())),
        }
    }

    fn set_meta(conn: &Connection, key: &str, value: &str) -> StorageResult<()> {
        conn.execute(
            "INSERT INTO kb_meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn meta(conn: &Connection, key: &str) -> StorageResult<Option<String>> {
        Ok(conn
            .query_row("SELECT value FROM kb_meta WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?)
    }

    // === Page pass ===

    /// Persist articles, sections, paragraphs and raw links in one transaction
    pub fn write_batch(&self, batch: &PageBatch) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut insert_article = tx.prepare_cached(
                "INSERT OR REPLACE INTO articles
                 (id, title, group_title, redirect_article_title, redirect_section_id, is_disambig)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            )?;
            for article in &batch.articles {
                let redirect = article.redirect.as_ref();
                insert_article.execute(params![
                    article.id as i64,
                    article.title,
                    article.group_title,
                    redirect.map(|r| r.article.as_str()),
                    redirect.and_then(|r| r.section.as_deref()),
                ])?;
            }

            let mut insert_section = tx.prepare_cached(
                "INSERT OR REPLACE INTO sections
                 (article_id, section_index, parent_index, level, title)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            let mut insert_section_id = tx.prepare_cached(
                "INSERT OR IGNORE INTO section_ids (article_id, id_string, section_index)
                 VALUES (?1, ?2, ?3)",
            )?;
            for section in &batch.sections {
                insert_section.execute(params![
                    section.article_id as i64,
                    section.index as i64,
                    section.parent.map(|p| p as i64),
                    section.level as i64,
                    section.title,
                ])?;
                for id in &section.ids {
                    insert_section_id.execute(params![
                        section.article_id as i64,
                        id,
                        section.index as i64,
                    ])?;
                }
            }

            let mut insert_paragraph = tx.prepare_cached(
                "INSERT OR REPLACE INTO paragraphs
                 (article_id, section_index, paragraph_index, sentence_count, token_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for paragraph in &batch.paragraphs {
                insert_paragraph.execute(params![
                    paragraph.article_id as i64,
                    paragraph.section_index as i64,
                    paragraph.paragraph_index as i64,
                    paragraph.sentence_count as i64,
                    paragraph.token_count as i64,
                ])?;
            }

            let mut insert_link = tx.prepare_cached(
                "INSERT INTO raw_links
                 (article_id, section_index, paragraph_index, sentence_index, start_index,
                  end_index, target_article, target_section, link_title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for link in &batch.raw_links {
                insert_link.execute(params![
                    link.article_id as i64,
                    link.section_index as i64,
                    link.paragraph_index as i64,
                    link.sentence_index as i64,
                    link.start as i64,
                    link.end as i64,
                    link.target_article,
                    link.target_section,
                    link.title,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Ids of all non-redirect articles
    pub fn article_ids(&self) -> StorageResult<HashSet<u64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT id FROM articles WHERE redirect_article_title IS NULL")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|id| id.map(|id| id as u64))
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(ids)
    }

    /// Count paragraphs per section and fill in subtree totals
    pub fn update_paragraph_counts(&self) -> StorageResult<u64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "UPDATE sections SET paragraph_count = (
                SELECT COUNT(*) FROM paragraphs P
                WHERE P.article_id = sections.article_id
                  AND P.section_index = sections.section_index
            )",
            [],
        )?;

        let mut articles: BTreeMap<i64, Vec<(i64, Option<i64>, i64)>> = BTreeMap::new();
        {
            let mut stmt = tx.prepare(
                "SELECT article_id, section_index, parent_index, paragraph_count
                 FROM sections ORDER BY article_id, section_index",
            )?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                articles
                    .entry(row.get(0)?)
                    .or_default()
                    .push((row.get(1)?, row.get(2)?, row.get(3)?));
            }
        }

        let mut updated = 0;
        {
            let mut update = tx.prepare_cached(
                "UPDATE sections SET total_paragraph_count = ?3
                 WHERE article_id = ?1 AND section_index = ?2",
            )?;
            for (article_id, sections) in &articles {
                let len = sections
                    .iter()
                    .map(|&(index, _, _)| index as usize + 1)
                    .max()
                    .unwrap_or(0);
                let mut tree = vec![(None, 0u64); len];
                for &(index, parent, count) in sections {
                    tree[index as usize] = (parent.map(|p| p as usize), count as u64);
                }
                let totals = subtree_totals(&tree);
                for &(index, _, _) in sections {
                    update.execute(params![article_id, index, totals[index as usize] as i64])?;
                    updated += 1;
                }
            }
        }
        tx.commit()?;
        Ok(updated)
    }

    // === Categories ===

    pub fn save_categories(&self, graph: &CategoryGraph) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM categories; DELETE FROM subcategories; DELETE FROM article_categories;",
        )?;
        {
            let mut insert = tx.prepare_cached("INSERT OR REPLACE INTO categories (id, title) VALUES (?1, ?2)")?;
            for (title, id) in graph.titles() {
                insert.execute(params![id as i64, title])?;
            }
            let mut insert = tx.prepare_cached(
                "INSERT INTO subcategories (category_id, subcategory_id) VALUES (?1, ?2)",
            )?;
            for (parent, child) in graph.subcategory_edges() {
                insert.execute(params![parent as i64, child as i64])?;
            }
            let mut insert = tx.prepare_cached(
                "INSERT INTO article_categories (article_id, category_id) VALUES (?1, ?2)",
            )?;
            for (category, article) in graph.member_edges() {
                insert.execute(params![article as i64, category as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Reset all flags, then flag the given articles as disambiguation pages
    pub fn set_disambiguation_pages(&self, article_ids: &BTreeSet<u64>) -> StorageResult<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("UPDATE articles SET is_disambig = 0", [])?;
        let mut flagged = 0;
        {
            let mut update = tx.prepare_cached(
                "UPDATE articles SET is_disambig = 1
                 WHERE id = ?1 AND redirect_article_title IS NULL",
            )?;
            for &id in article_ids {
                flagged += update.execute(params![id as i64])?;
            }
        }
        tx.commit()?;
        info!(flagged, "flagged disambiguation pages");
        Ok(flagged)
    }

    // === Link resolution ===

    /// Title index, redirect table and section ids of the whole knowledge base
    pub fn link_resolver(&self) -> StorageResult<LinkResolver> {
        let conn = self.conn.lock().unwrap();
        let mut resolver = LinkResolver::new();

        let mut stmt = conn.prepare(
            "SELECT id, title, redirect_article_title, redirect_section_id FROM articles",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let title: String = row.get(1)?;
            match row.get::<_, Option<String>>(2)? {
                Some(article) => resolver.add_redirect(
                    title,
                    RedirectTarget {
                        article,
                        section: row.get(3)?,
                    },
                ),
                None => resolver.add_article(title, id as u64),
            }
        }

        let mut stmt = conn.prepare("SELECT article_id, id_string, section_index FROM section_ids")?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let article_id: i64 = row.get(0)?;
            let index: i64 = row.get(2)?;
            resolver.add_section_id(article_id as u64, row.get::<_, String>(1)?, index as usize);
        }

        Ok(resolver)
    }

    /// Resolve every raw link into the `links` table and drop the raw links
    pub fn resolve_links(&self, resolver: &LinkResolver) -> StorageResult<LinkResolution> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let mut stats = LinkResolution::default();

        let disambiguation: HashSet<i64> = {
            let mut stmt = tx.prepare("SELECT id FROM articles WHERE is_disambig = 1")?;
            let ids = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<HashSet<i64>, _>>()?;
            ids
        };

        tx.execute("DELETE FROM links", [])?;
        {
            let mut select = tx.prepare(
                "SELECT article_id, section_index, paragraph_index, sentence_index, start_index,
                        end_index, target_article, target_section, link_title
                 FROM raw_links ORDER BY rowid",
            )?;
            let mut insert = tx.prepare(
                "INSERT INTO links
                 (article_id, section_index, paragraph_index, sentence_index, start_index, end_index,
                  linked_article_id, linked_section_index, link_title, group_title, is_on_disambig)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;

            let mut rows = select.query([])?;
            while let Some(row) = rows.next()? {
                let target_article: String = row.get(6)?;
                let target_section: Option<String> = row.get(7)?;
                let target = match resolver.resolve(&target_article, target_section.as_deref()) {
                    Ok(target) => target,
                    Err(Unresolved::UnknownArticle) => {
                        stats.unknown_article += 1;
                        continue;
                    }
                    Err(Unresolved::UnknownSection) => {
                        debug!(article = %target_article, section = ?target_section, "unknown link section");
                        stats.unknown_section += 1;
                        continue;
                    }
                };

                let article_id: i64 = row.get(0)?;
                let title: String = row.get(8)?;
                insert.execute(params![
                    article_id,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, i64>(5)?,
                    target.article_id as i64,
                    section_to_sql(target.section_index),
                    title,
                    group_title(&title),
                    disambiguation.contains(&article_id),
                ])?;
                stats.resolved += 1;
            }
        }
        tx.execute("DELETE FROM raw_links", [])?;
        tx.commit()?;

        info!(
            resolved = stats.resolved,
            unknown_article = stats.unknown_article,
            unknown_section = stats.unknown_section,
            "resolved links"
        );
        Ok(stats)
    }

    // === Sense inventory ===

    /// Gather the evidence tables the inventory builder works on
    pub fn inventory_input(&self) -> StorageResult<InventoryInput> {
        let conn = self.conn.lock().unwrap();
        let mut input = InventoryInput::default();

        let mut stmt = conn.prepare(
            "SELECT id, group_title FROM articles
             WHERE is_disambig = 1 AND redirect_article_title IS NULL",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            input
                .disambiguation_pages
                .insert(row.get::<_, i64>(0)? as u64, row.get(1)?);
        }

        let mut stmt = conn.prepare(
            "SELECT S.article_id, S.section_index, S.parent_index, S.title
             FROM sections S JOIN articles A ON A.id = S.article_id
             WHERE A.is_disambig = 1",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            input.disambiguation_sections.push(SectionOutline {
                article_id: row.get::<_, i64>(0)? as u64,
                index: row.get::<_, i64>(1)? as usize,
                parent: row.get::<_, Option<i64>>(2)?.map(|p| p as usize),
                title: row.get(3)?,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT article_id, section_index, linked_article_id, linked_section_index, link_title
             FROM links WHERE is_on_disambig = 1",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            input.disambiguation_links.push(PageLink {
                article_id: row.get::<_, i64>(0)? as u64,
                section_index: row.get::<_, i64>(1)? as usize,
                target: ResolvedTarget {
                    article_id: row.get::<_, i64>(2)? as u64,
                    section_index: section_from_sql(row.get(3)?),
                },
                title: row.get(4)?,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT group_title, linked_article_id, linked_section_index, COUNT(*)
             FROM (
                SELECT DISTINCT article_id, section_index, paragraph_index, sentence_index,
                       linked_article_id, linked_section_index, group_title
                FROM links
                WHERE is_on_disambig = 0
                  AND group_title IN (SELECT group_title FROM articles WHERE is_disambig = 1)
             )
             GROUP BY group_title, linked_article_id, linked_section_index",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            input.group_mentions.push(GroupMention {
                group_title: row.get(0)?,
                target: ResolvedTarget {
                    article_id: row.get::<_, i64>(1)? as u64,
                    section_index: section_from_sql(row.get(2)?),
                },
                count: row.get::<_, i64>(3)? as u64,
            });
        }

        let mut stmt = conn.prepare(
            "SELECT linked_article_id, linked_section_index, COUNT(*)
             FROM (
                SELECT DISTINCT article_id, section_index, paragraph_index, sentence_index,
                       linked_article_id, linked_section_index
                FROM links WHERE is_on_disambig = 0
             )
             GROUP BY linked_article_id, linked_section_index",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let target = ResolvedTarget {
                article_id: row.get::<_, i64>(0)? as u64,
                section_index: section_from_sql(row.get(1)?),
            };
            input.target_mentions.insert(target, row.get::<_, i64>(2)? as u64);
        }

        let mut stmt = conn.prepare(
            "SELECT R.group_title, A.id
             FROM articles R JOIN articles A ON R.redirect_article_title = A.title
             WHERE A.is_disambig = 1 AND A.redirect_article_title IS NULL",
        )?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            input
                .disambiguation_redirects
                .push((row.get(0)?, row.get::<_, i64>(1)? as u64));
        }

        let needed: BTreeSet<ResolvedTarget> = input
            .group_mentions
            .iter()
            .map(|mention| mention.target)
            .chain(input.disambiguation_links.iter().map(|link| link.target))
            .collect();
        let mut article_volume = conn.prepare_cached(
            "SELECT COALESCE(SUM(paragraph_count), 0) FROM sections WHERE article_id = ?1",
        )?;
        let mut section_volume = conn.prepare_cached(
            "SELECT total_paragraph_count FROM sections WHERE article_id = ?1 AND section_index = ?2",
        )?;
        for target in needed {
            let volume: Option<i64> = match target.section_index {
                None => article_volume
                    .query_row(params![target.article_id as i64], |row| row.get(0))
                    .optional()?,
                Some(index) => section_volume
                    .query_row(params![target.article_id as i64, index as i64], |row| row.get(0))
                    .optional()?,
            };
            if let Some(volume) = volume {
                input.volumes.insert(target, volume as u64);
            }
        }

        Ok(input)
    }

    /// Replace the stored inventory
    pub fn save_inventory(&self, inventory: &SenseInventory) -> StorageResult<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM sense_groups; DELETE FROM targets; DELETE FROM senses;
             DELETE FROM alternative_group_titles;",
        )?;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO sense_groups (id, title, evidence) VALUES (?1, ?2, ?3)",
            )?;
            for group in &inventory.groups {
                insert.execute(params![group.id as i64, group.title, group.evidence as i64])?;
            }

            let mut insert = tx.prepare_cached(
                "INSERT INTO targets (id, article_id, section_index, evidence) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for target in &inventory.targets {
                insert.execute(params![
                    target.id as i64,
                    target.target.article_id as i64,
                    section_to_sql(target.target.section_index),
                    target.evidence as i64,
                ])?;
            }

            let mut insert = tx.prepare_cached(
                "INSERT INTO senses
                 (id, group_id, target_id, article_id, section_index, on_disambig, volume,
                  matching_count, other_count)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for sense in &inventory.senses {
                insert.execute(params![
                    sense.id as i64,
                    sense.group_id as i64,
                    sense.target_id as i64,
                    sense.target.article_id as i64,
                    section_to_sql(sense.target.section_index),
                    sense.evidence.on_disambiguation_page,
                    sense.evidence.volume as i64,
                    sense.evidence.matching as i64,
                    sense.evidence.other as i64,
                ])?;
            }

            let mut insert = tx.prepare_cached(
                "INSERT INTO alternative_group_titles (title, group_id) VALUES (?1, ?2)",
            )?;
            for (title, group_id) in &inventory.alternative_titles {
                insert.execute(params![title, *group_id as i64])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Sense ids of every group, ascending
    pub fn senses_by_group(&self) -> StorageResult<BTreeMap<usize, Vec<usize>>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT group_id, id FROM senses ORDER BY group_id, id")?;
        let mut rows = stmt.query([])?;
        let mut by_group: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            by_group
                .entry(row.get::<_, i64>(0)? as usize)
                .or_default()
                .push(row.get::<_, i64>(1)? as usize);
        }
        Ok(by_group)
    }

    // === Examples ===

    /// Example paragraphs of every sense.
    ///
    /// Paragraphs and sentences linking the sense's target from outside
    /// disambiguation pages, plus every paragraph of the target article or
    /// target section subtree (whole paragraphs, no sentence).
    pub fn sense_paragraphs(&self) -> StorageResult<Vec<SenseParagraphs>> {
        let conn = self.conn.lock().unwrap();

        let mut senses_stmt =
            conn.prepare("SELECT id, article_id, section_index FROM senses ORDER BY id")?;
        let senses = senses_stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as usize,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut link_stmt = conn.prepare_cached(
            "SELECT DISTINCT article_id, section_index, paragraph_index, sentence_index
             FROM links
             WHERE linked_article_id = ?1 AND linked_section_index = ?2 AND is_on_disambig = 0",
        )?;
        let mut sections_stmt = conn.prepare_cached(
            "SELECT section_index, parent_index FROM sections
             WHERE article_id = ?1 ORDER BY section_index",
        )?;
        let mut paragraphs_stmt = conn.prepare_cached(
            "SELECT section_index, paragraph_index FROM paragraphs WHERE article_id = ?1",
        )?;

        let mut result = Vec::with_capacity(senses.len());
        for (sense_id, article_id, section_index) in senses {
            let mut paragraphs: Vec<ParagraphKey> = link_stmt
                .query_map(params![article_id, section_index], |row| {
                    Ok(ParagraphKey::paragraph(
                        row.get::<_, i64>(0)? as u64,
                        row.get::<_, i64>(1)? as usize,
                        row.get::<_, i64>(2)? as usize,
                    )
                    .sentence(row.get::<_, i64>(3)? as usize))
                })?
                .collect::<Result<_, _>>()?;

            let subtree: Option<HashSet<i64>> = match section_from_sql(section_index) {
                None => None,
                Some(_) => {
                    let mut members = HashSet::from([section_index]);
                    let mut rows = sections_stmt.query(params![article_id])?;
                    while let Some(row) = rows.next()? {
                        let index: i64 = row.get(0)?;
                        let parent: Option<i64> = row.get(1)?;
                        if parent.is_some_and(|p| members.contains(&p)) {
                            members.insert(index);
                        }
                    }
                    Some(members)
                }
            };

            let mut rows = paragraphs_stmt.query(params![article_id])?;
            while let Some(row) = rows.next()? {
                let section: i64 = row.get(0)?;
                if subtree.as_ref().is_some_and(|members| !members.contains(&section)) {
                    continue;
                }
                paragraphs.push(ParagraphKey::paragraph(
                    article_id as u64,
                    section as usize,
                    row.get::<_, i64>(1)? as usize,
                ));
            }

            paragraphs.sort_unstable();
            paragraphs.dedup();
            result.push(SenseParagraphs {
                sense_id,
                paragraphs,
            });
        }

        Ok(result)
    }

    /// Write one `data` row per (sense, paragraph) with its split
    pub fn save_examples(&self, senses: &[SenseParagraphs], partition: &Partition) -> StorageResult<u64> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM data", [])?;
        let mut written = 0;
        {
            let mut insert = tx.prepare_cached(
                "INSERT INTO data
                 (article_id, section_index, paragraph_index, sentence_index, sense_id, dataset)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for sense in senses {
                for key in &sense.paragraphs {
                    insert.execute(params![
                        key.article_id as i64,
                        key.section_index as i64,
                        key.paragraph_index as i64,
                        key.sentence_index.map(|s| s as i64),
                        sense.sense_id as i64,
                        partition.dataset_of(key).0 as i64,
                    ])?;
                    written += 1;
                }
            }
        }
        tx.commit()?;
        info!(examples = written, "saved example assignments");
        Ok(written)
    }

    /// Stream `data` rows ordered by paragraph position.
    ///
    /// Stops early when `visit` returns `false`. Returns the number of rows visited.
    pub fn visit_example_infos<F>(&self, mut visit: F) -> StorageResult<u64>
    where
        F: FnMut(ExampleInfo) -> bool,
    {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT D.article_id, D.section_index, D.paragraph_index, D.sentence_index,
                    S.group_id, D.sense_id, D.dataset
             FROM data D JOIN senses S ON S.id = D.sense_id
             ORDER BY D.article_id, D.section_index, D.paragraph_index, D.sentence_index, D.sense_id",
        )?;
        let mut rows = stmt.query([])?;
        let mut visited = 0;
        while let Some(row) = rows.next()? {
            let mut key = ParagraphKey::paragraph(
                row.get::<_, i64>(0)? as u64,
                row.get::<_, i64>(1)? as usize,
                row.get::<_, i64>(2)? as usize,
            );
            key.sentence_index = row.get::<_, Option<i64>>(3)?.map(|s| s as usize);
            let info = ExampleInfo {
                key,
                group_id: row.get::<_, i64>(4)? as usize,
                sense_id: row.get::<_, i64>(5)? as usize,
                dataset: Dataset(row.get::<_, i64>(6)? as usize),
            };
            visited += 1;
            if !visit(info) {
                break;
            }
        }
        Ok(visited)
    }

    /// Row counts of the main tables
    pub fn stats(&self) -> StorageResult<KnowledgeBaseStats> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> StorageResult<u64> {
            Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))? as u64)
        };

        Ok(KnowledgeBaseStats {
            articles: count("SELECT COUNT(*) FROM articles WHERE redirect_article_title IS NULL")?,
            redirects: count("SELECT COUNT(*) FROM articles WHERE redirect_article_title IS NOT NULL")?,
            disambiguation_pages: count("SELECT COUNT(*) FROM articles WHERE is_disambig = 1")?,
            sections: count("SELECT COUNT(*) FROM sections")?,
            paragraphs: count("SELECT COUNT(*) FROM paragraphs")?,
            links: count("SELECT COUNT(*) FROM links")?,
            categories: count("SELECT COUNT(*) FROM categories")?,
            sense_groups: count("SELECT COUNT(*) FROM sense_groups")?,
            targets: count("SELECT COUNT(*) FROM targets")?,
            senses: count("SELECT COUNT(*) FROM senses")?,
            alternative_group_titles: count("SELECT COUNT(*) FROM alternative_group_titles")?,
            examples: count("SELECT COUNT(*) FROM data")?,
        })
    }
}

impl SenseLookup for KnowledgeBase {
    fn ambiguous_groups(&self) -> StorageResult<Vec<AmbiguousGroup>> {
        let by_group = self.senses_by_group()?;
        let conn = self.conn.lock().unwrap();

        let mut groups: BTreeMap<usize, AmbiguousGroup> = by_group
            .into_iter()
            .filter(|(_, senses)| senses.len() >= 2)
            .map(|(group_id, sense_ids)| {
                (
                    group_id,
                    AmbiguousGroup {
                        group_id,
                        titles: Vec::new(),
                        sense_ids,
                    },
                )
            })
            .collect();

        // canonical titles first, alternatives after
        for sql in [
            "SELECT id, title FROM sense_groups",
            "SELECT group_id, title FROM alternative_group_titles ORDER BY title",
        ] {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let group_id = row.get::<_, i64>(0)? as usize;
                if let Some(group) = groups.get_mut(&group_id) {
                    group.titles.push(row.get(1)?);
                }
            }
        }

        Ok(groups.into_values().collect())
    }

    fn sense_location(&self, sense_id: usize) -> StorageResult<Option<SenseLocation>> {
        let conn = self.conn.lock().unwrap();
        let location = conn
            .query_row(
                "SELECT A.title, X.title
                 FROM senses S
                 JOIN articles A ON A.id = S.article_id
                 LEFT JOIN sections X ON X.article_id = S.article_id AND X.section_index = S.section_index
                 WHERE S.id = ?1",
                params![sense_id as i64],
                |row| {
                    Ok(SenseLocation {
                        article_title: row.get(0)?,
                        section_title: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{build_inventory, SenseThresholds};
    use crate::partition::Partitioner;
    use crate::storage::records::{ArticleRecord, ParagraphRecord, RawLinkRecord, SectionRecord};

    fn create_test_kb() -> KnowledgeBase {
        KnowledgeBase::open_in_memory().expect("Failed to create in-memory knowledge base")
    }

    fn article(id: u64, title: &str) -> ArticleRecord {
        ArticleRecord {
            id,
            title: title.to_string(),
            group_title: group_title(title),
            redirect: None,
        }
    }

    fn redirect(id: u64, title: &str, target: &str, section: Option<&str>) -> ArticleRecord {
        ArticleRecord {
            redirect: Some(RedirectTarget {
                article: target.to_string(),
                section: section.map(str::to_string),
            }),
            ..article(id, title)
        }
    }

    fn section(article_id: u64, index: usize, parent: Option<usize>, title: Option<&str>) -> SectionRecord {
        SectionRecord {
            article_id,
            index,
            parent,
            level: if parent.is_some() { 3 } else { 2 },
            title: title.map(str::to_string),
            ids: title.map(|t| vec![t.replace(' ', "_")]).unwrap_or_default(),
        }
    }

    fn paragraphs(article_id: u64, section_index: usize, count: usize) -> Vec<ParagraphRecord> {
        (0..count)
            .map(|paragraph_index| ParagraphRecord {
                article_id,
                section_index,
                paragraph_index,
                sentence_count: 1,
                token_count: 8,
            })
            .collect()
    }

    fn raw_link(article_id: u64, paragraph_index: usize, target: &str, title: &str) -> RawLinkRecord {
        RawLinkRecord {
            article_id,
            section_index: 0,
            paragraph_index,
            sentence_index: 0,
            start: 0,
            end: title.len(),
            target_article: target.to_string(),
            target_section: None,
            title: title.to_string(),
        }
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let kb = KnowledgeBase::open(dir.path().join("nested").join("kb.sqlite3")).unwrap();
        let conn = kb.conn.lock().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }

    #[test]
    fn test_build_state_lifecycle() {
        let kb = create_test_kb();
        assert!(matches!(kb.ensure_complete(), Err(StorageError::IncompleteBuild(_))));

        kb.begin_build().unwrap();
        assert_eq!(kb.build_state().unwrap(), Some(BuildState::InProgress));
        assert!(kb.ensure_complete().is_err());
        assert!(kb.built_at().unwrap().is_none());

        let built_at = kb.finish_build().unwrap();
        assert!(kb.ensure_complete().is_ok());
        assert_eq!(kb.built_at().unwrap().map(|t| t.timestamp()), Some(built_at.timestamp()));
    }

    #[test]
    fn test_begin_build_clears_previous_contents() {
        let kb = create_test_kb();
        kb.write_batch(&PageBatch {
            articles: vec![article(1, "Hermes")],
            ..Default::default()
        })
        .unwrap();
        kb.begin_build().unwrap();
        assert_eq!(kb.stats().unwrap().articles, 0);
    }

    #[test]
    fn test_paragraph_totals_sum_subtrees() {
        let kb = create_test_kb();
        let mut batch = PageBatch {
            articles: vec![article(1, "Mercury_(planet)")],
            sections: vec![
                section(1, 0, None, None),
                section(1, 1, None, Some("Orbit")),
                section(1, 2, Some(1), Some("Perihelion")),
            ],
            ..Default::default()
        };
        batch.paragraphs.extend(paragraphs(1, 0, 2));
        batch.paragraphs.extend(paragraphs(1, 1, 1));
        batch.paragraphs.extend(paragraphs(1, 2, 3));
        kb.write_batch(&batch).unwrap();

        assert_eq!(kb.update_paragraph_counts().unwrap(), 3);

        let conn = kb.conn.lock().unwrap();
        let totals: Vec<(i64, i64)> = conn
            .prepare("SELECT paragraph_count, total_paragraph_count FROM sections ORDER BY section_index")
            .unwrap()
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(totals, vec![(2, 2), (1, 4), (3, 3)]);
    }

    #[test]
    fn test_resolve_links_follows_redirects_and_drops_unknown() {
        let kb = create_test_kb();
        kb.write_batch(&PageBatch {
            articles: vec![
                article(1, "Hermes"),
                article(2, "Mercury_(mythology)"),
                redirect(3, "Mercurius", "Mercury_(mythology)", None),
            ],
            sections: vec![section(2, 0, None, None), section(2, 1, None, Some("Cult"))],
            raw_links: vec![
                raw_link(1, 0, "Mercury_(mythology)", "Mercury"),
                raw_link(1, 1, "Mercurius", "Mercurius"),
                RawLinkRecord {
                    target_section: Some("Cult".to_string()),
                    ..raw_link(1, 2, "Mercury_(mythology)", "his cult")
                },
                RawLinkRecord {
                    target_section: Some("Temples".to_string()),
                    ..raw_link(1, 3, "Mercury_(mythology)", "temples")
                },
                raw_link(1, 4, "de:Merkur", "Merkur"),
            ],
            ..Default::default()
        })
        .unwrap();

        let mut resolver = kb.link_resolver().unwrap();
        resolver.flatten_redirects(3);
        let stats = kb.resolve_links(&resolver).unwrap();

        assert_eq!(
            stats,
            LinkResolution { resolved: 3, unknown_article: 1, unknown_section: 1 }
        );
        let conn = kb.conn.lock().unwrap();
        let raw: i64 = conn.query_row("SELECT COUNT(*) FROM raw_links", [], |r| r.get(0)).unwrap();
        assert_eq!(raw, 0);
        let sections: Vec<i64> = conn
            .prepare("SELECT linked_section_index FROM links ORDER BY paragraph_index")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(sections, vec![-1, -1, 1]);
    }

    #[test]
    fn test_inventory_round_trip_and_lookup() {
        let kb = create_test_kb();
        let mut batch = PageBatch {
            articles: vec![
                article(1, "Mercury_(disambiguation)"),
                article(10, "Mercury_(planet)"),
                article(11, "Mercury_(element)"),
                redirect(5, "Quicksilver_(disambiguation)", "Mercury_(disambiguation)", None),
            ],
            sections: vec![
                section(1, 0, None, None),
                section(10, 0, None, None),
                section(11, 0, None, None),
            ],
            raw_links: vec![
                raw_link(1, 0, "Mercury_(planet)", "Mercury (planet)"),
                raw_link(1, 1, "Mercury_(element)", "Mercury (element)"),
            ],
            ..Default::default()
        };
        batch.paragraphs.extend(paragraphs(1, 0, 2));
        batch.paragraphs.extend(paragraphs(10, 0, 20));
        batch.paragraphs.extend(paragraphs(11, 0, 15));
        kb.write_batch(&batch).unwrap();
        kb.update_paragraph_counts().unwrap();
        kb.set_disambiguation_pages(&BTreeSet::from([1, 5])).unwrap();
        kb.resolve_links(&kb.link_resolver().unwrap()).unwrap();

        let input = kb.inventory_input().unwrap();
        assert_eq!(input.disambiguation_pages.len(), 1);
        assert_eq!(input.disambiguation_links.len(), 2);
        assert_eq!(input.disambiguation_redirects, vec![("quicksilver".to_string(), 1)]);

        let inventory = build_inventory(&input, SenseThresholds::default());
        kb.save_inventory(&inventory).unwrap();
        assert_eq!(inventory.senses.len(), 2);

        let groups = kb.ambiguous_groups().unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].titles, vec!["mercury", "quicksilver"]);
        assert_eq!(groups[0].sense_ids, vec![0, 1]);

        let planet = kb.sense_location(0).unwrap().unwrap();
        assert_eq!(planet.article_title, "Mercury_(planet)");
        assert_eq!(planet.section_title, None);
        assert!(kb.sense_location(9).unwrap().is_none());

        let senses = kb.sense_paragraphs().unwrap();
        assert_eq!(senses[0].paragraphs.len(), 20);
        assert_eq!(senses[1].paragraphs.len(), 15);

        let partition = Partitioner::new(vec![0.15, 0.15], 1).unwrap().partition(senses.clone());
        assert_eq!(kb.save_examples(&senses, &partition).unwrap(), 35);

        let mut infos = Vec::new();
        kb.visit_example_infos(|info| {
            infos.push(info);
            true
        })
        .unwrap();
        assert_eq!(infos.len(), 35);
        assert!(infos.windows(2).all(|w| w[0].key <= w[1].key));
        assert!(infos.iter().all(|info| info.group_id == 0));
    }
}
