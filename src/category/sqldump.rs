//! Import of the `page` and `categorylinks` SQL dumps
//!
//! The dumps are long `INSERT INTO `table` VALUES (...),(...);` lines. Rows
//! are read with a small tuple scanner that understands quoted strings with
//! backslash escapes, numbers and `NULL`.

use super::graph::CategoryGraph;
use super::{CategoryError, CategoryResult};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info};

/// Category pages live in this namespace
pub const CATEGORY_NAMESPACE: i64 = 14;

/// One column value of a dumped row
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Integer(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_i64().and_then(|value| u64::try_from(value).ok())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

/// Open a SQL dump, gunzipping when the file name ends in `.gz`
pub fn open_sql_dump(path: impl AsRef<Path>) -> CategoryResult<Box<dyn BufRead + Send>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let gzipped = path.extension().is_some_and(|ext| ext == "gz");
    Ok(if gzipped {
        Box::new(BufReader::new(MultiGzDecoder::new(file)))
    } else {
        Box::new(BufReader::new(file))
    })
}

/// Rows of one `INSERT` line, or nothing if the line inserts into another table.
pub fn insert_rows(line: &str, table: &str) -> CategoryResult<Vec<Vec<SqlValue>>> {
    let prefix = format!("INSERT INTO `{}` VALUES ", table);
    let Some(values) = line.strip_prefix(prefix.as_str()) else {
        return Ok(Vec::new());
    };
    TupleScanner::new(values).rows()
}

/// Call `on_row` for every row inserted into `table`; returns the number of lines read.
pub fn for_each_row<R, F>(mut reader: R, table: &str, mut on_row: F) -> CategoryResult<u64>
where
    R: BufRead,
    F: FnMut(&[SqlValue]),
{
    let mut buf = Vec::new();
    let mut lines = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        lines += 1;
        let line = String::from_utf8_lossy(&buf);
        let rows = insert_rows(line.trim_end_matches(['\n', '\r']), table).map_err(|e| match e {
            CategoryError::Sql { reason, .. } => CategoryError::Sql { line: lines, reason },
            other => other,
        })?;
        for row in &rows {
            on_row(row);
        }
    }
    Ok(lines)
}

/// Load category ids and titles from the `page` table dump.
pub fn import_categories<R: BufRead>(reader: R, graph: &mut CategoryGraph) -> CategoryResult<usize> {
    let mut imported = 0;
    let lines = for_each_row(reader, "page", |row| {
        let (Some(id), Some(namespace), Some(title)) = (
            row.first().and_then(SqlValue::as_u64),
            row.get(1).and_then(SqlValue::as_i64),
            row.get(2).and_then(SqlValue::as_str),
        ) else {
            return;
        };
        if namespace == CATEGORY_NAMESPACE {
            graph.add_category(id, title);
            imported += 1;
        }
    })?;
    info!(lines, categories = imported, "imported categories");
    Ok(imported)
}

/// Counters of a category-link import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkImport {
    pub memberships: usize,
    pub subcategories: usize,
    pub skipped: usize,
}

/// Load memberships and subcategory edges from the `categorylinks` dump.
///
/// `page` rows are kept only for articles accepted by `is_article`; rows
/// naming an unknown category are skipped.
pub fn import_category_links<R, F>(
    reader: R,
    graph: &mut CategoryGraph,
    is_article: F,
) -> CategoryResult<LinkImport>
where
    R: BufRead,
    F: Fn(u64) -> bool,
{
    let mut stats = LinkImport::default();

    let lines = for_each_row(reader, "categorylinks", |row| {
        let (Some(from), Some(to), Some(kind)) = (
            row.first().and_then(SqlValue::as_u64),
            row.get(1).and_then(SqlValue::as_str),
            row.get(6).and_then(SqlValue::as_str),
        ) else {
            stats.skipped += 1;
            return;
        };
        let Some(category) = graph.category_id(to) else {
            debug!(category = %to, "link into unknown category");
            stats.skipped += 1;
            return;
        };
        match kind {
            "page" if is_article(from) => {
                graph.add_member(category, from);
                stats.memberships += 1;
            }
            "subcat" => {
                graph.add_subcategory(category, from);
                stats.subcategories += 1;
            }
            _ => stats.skipped += 1,
        }
    })?;

    info!(
        lines,
        memberships = stats.memberships,
        subcategories = stats.subcategories,
        skipped = stats.skipped,
        "imported category links"
    );
    Ok(stats)
}

struct TupleScanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> TupleScanner<'a> {
    fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn error(&self, reason: impl Into<String>) -> CategoryError {
        CategoryError::Sql {
            line: 0,
            reason: format!("{} at byte {}", reason.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.text.as_bytes().get(self.pos).copied()
    }

    fn rows(mut self) -> CategoryResult<Vec<Vec<SqlValue>>> {
        let mut rows = Vec::new();
        loop {
            match self.peek() {
                Some(b'(') => {
                    self.pos += 1;
                    rows.push(self.row()?);
                }
                Some(b',') | Some(b' ') => self.pos += 1,
                Some(b';') | None => return Ok(rows),
                Some(_) => return Err(self.error("expected row")),
            }
        }
    }

    fn row(&mut self) -> CategoryResult<Vec<SqlValue>> {
        let mut values = Vec::new();
        loop {
            values.push(self.value()?);
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b')') => {
                    self.pos += 1;
                    return Ok(values);
                }
                _ => return Err(self.error("unterminated row")),
            }
        }
    }

    fn value(&mut self) -> CategoryResult<SqlValue> {
        match self.peek() {
            Some(b'\'') => self.quoted(),
            Some(_) => {
                let rest = &self.text[self.pos..];
                let len = rest.find([',', ')']).unwrap_or(rest.len());
                let raw = &rest[..len];
                self.pos += len;
                if raw.eq_ignore_ascii_case("NULL") {
                    Ok(SqlValue::Null)
                } else if let Ok(value) = raw.parse::<i64>() {
                    Ok(SqlValue::Integer(value))
                } else if let Ok(value) = raw.parse::<f64>() {
                    Ok(SqlValue::Float(value))
                } else {
                    Err(self.error(format!("bad literal {:?}", raw)))
                }
            }
            None => Err(self.error("unexpected end of line")),
        }
    }

    fn quoted(&mut self) -> CategoryResult<SqlValue> {
        self.pos += 1;
        let mut value = String::new();
        let mut chars = self.text[self.pos..].char_indices();

        while let Some((offset, c)) = chars.next() {
            match c {
                '\\' => {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    value.push(match escaped {
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        '0' => '\0',
                        'Z' => '\u{1a}',
                        other => other,
                    });
                }
                '\'' => {
                    self.pos += offset + 1;
                    return Ok(SqlValue::Text(value));
                }
                other => value.push(other),
            }
        }

        self.pos = self.text.len();
        Err(self.error("unterminated string"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const PAGE_DUMP: &str = "-- MySQL dump\n\
        INSERT INTO `page` VALUES (1,14,'Disambiguation_pages',0,0),(2,14,'Place_name_disambiguation_pages',0,0),(10,0,'Mercury',0,0),(3,14,'Pilots\\' names',0,0);\n\
        INSERT INTO `other` VALUES (9,14,'Ignored',0,0);\n";

    const LINK_DUMP: &str = "INSERT INTO `categorylinks` VALUES \
        (2,'Disambiguation_pages','X','2020-01-01 00:00:00','','uca','subcat'),\
        (10,'Place_name_disambiguation_pages','MERCURY','2020-01-01 00:00:00','','uca','page'),\
        (11,'Place_name_disambiguation_pages','GHOST','2020-01-01 00:00:00','','uca','page'),\
        (12,'Unknown_category','Y','2020-01-01 00:00:00','','uca','page'),\
        (13,'Disambiguation_pages','Z','2020-01-01 00:00:00','','uca','file');\n";

    #[test]
    fn scans_escapes_and_literals() {
        let rows = insert_rows(
            "INSERT INTO `t` VALUES (1,-2,'a\\'b\\\\c',NULL,1.5),(3,4,'(,)',NULL,0);",
            "t",
        )
        .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], SqlValue::Integer(-2));
        assert_eq!(rows[0][2], SqlValue::Text("a'b\\c".to_string()));
        assert_eq!(rows[0][3], SqlValue::Null);
        assert_eq!(rows[0][4], SqlValue::Float(1.5));
        assert_eq!(rows[1][2].as_str(), Some("(,)"));
    }

    #[test]
    fn other_tables_yield_nothing() {
        assert!(insert_rows("INSERT INTO `x` VALUES (1);", "t").unwrap().is_empty());
    }

    #[test]
    fn unterminated_string_is_an_error() {
        assert!(insert_rows("INSERT INTO `t` VALUES (1,'abc", "t").is_err());
    }

    #[test]
    fn imports_categories_and_links() {
        let mut graph = CategoryGraph::new();
        let categories = import_categories(Cursor::new(PAGE_DUMP), &mut graph).unwrap();
        assert_eq!(categories, 3);
        assert_eq!(graph.category_id("Pilots'_names"), None);
        assert_eq!(graph.category_id("Pilots' names"), Some(3));

        let stats =
            import_category_links(Cursor::new(LINK_DUMP), &mut graph, |id| id == 10).unwrap();
        assert_eq!(stats.subcategories, 1);
        assert_eq!(stats.memberships, 1);
        assert_eq!(stats.skipped, 3);

        let flagged = graph.member_articles("Disambiguation_pages");
        assert_eq!(flagged.into_iter().collect::<Vec<_>>(), vec![10]);
    }

    #[test]
    fn links_apply_row_by_row() {
        let mut graph = CategoryGraph::new();
        graph.add_category(1, "Disambiguation_pages");

        let dump = "INSERT INTO `categorylinks` VALUES \
            (10,'Disambiguation_pages','A','2020-01-01 00:00:00','','uca','page');\n\
            INSERT INTO `categorylinks` VALUES (11,'Disambiguation_pages','B\n";
        let result = import_category_links(Cursor::new(dump), &mut graph, |_| true);

        assert!(matches!(result, Err(CategoryError::Sql { line: 2, .. })));
        let flagged = graph.member_articles("Disambiguation_pages");
        assert_eq!(flagged.into_iter().collect::<Vec<_>>(), vec![10]);
    }
}
