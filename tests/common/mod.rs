//! Common test utilities: a miniature Wikipedia on disk
//!
//! Writes an XML page dump, the `page` and `categorylinks` SQL dumps and a
//! small-scale configuration into a temporary directory.

#![allow(dead_code)]

use bzip2::write::BzEncoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wikisense::{BuildInputs, PipelineConfig};

/// Id of the `Disambiguation_pages` category in every fixture
pub const DISAMBIGUATION_CATEGORY: u64 = 900;

pub const PLANET: u64 = 10;
pub const ELEMENT: u64 = 11;
pub const MYTHOLOGY: u64 = 12;
pub const MERCURY_DISAMBIGUATION: u64 = 20;
pub const HERMES: u64 = 30;
pub const THERMOMETER: u64 = 31;
pub const QUICKSILVER: u64 = 40;
pub const MERCURY_REDIRECT: u64 = 41;
pub const QUECKSILBER: u64 = 42;

/// One page of a fixture dump
pub struct FixturePage {
    pub id: u64,
    pub title: &'static str,
    pub text: &'static str,
}

/// The Mercury corpus, in ascending id order
pub fn mercury_pages() -> Vec<FixturePage> {
    vec![
        FixturePage {
            id: PLANET,
            title: "Mercury (planet)",
            text: "Mercury is the smallest planet in the Solar System and the closest to the Sun.\n\n\
                   The planet orbits the Sun once every eighty eight days.\n\n\
                   Mercury has no natural moons and only a very thin exosphere.\n",
        },
        FixturePage {
            id: ELEMENT,
            title: "Mercury (element)",
            text: "Mercury is a chemical element that is liquid at room temperature.\n",
        },
        FixturePage {
            id: MYTHOLOGY,
            title: "Mercury (mythology)",
            text: "Mercury is a major god in Roman religion and the patron of travellers.\n",
        },
        FixturePage {
            id: MERCURY_DISAMBIGUATION,
            title: "Mercury",
            text: "Mercury may refer to the planet [[Mercury (planet)]] or the metal \
                   [[Mercury (element)]] used in old thermometers.\n\
                   == See also ==\n\
                   The Roman god is described at [[Mercury (mythology)]] in great detail.\n",
        },
        FixturePage {
            id: HERMES,
            title: "Hermes",
            text: "Hermes is the Greek counterpart of [[Mercury (mythology)|Mercury]], the Roman messenger god. \
                   Astronomers named the planet [[Mercury (planet)|Mercury]] after him.\n",
        },
        FixturePage {
            id: THERMOMETER,
            title: "Thermometer",
            text: "Old thermometers were filled with liquid [[Mercury (element)|mercury]] metal. \
                   Cheap ones were also filled with [[Quicksilver|mercury]] long ago.\n",
        },
        FixturePage {
            id: QUICKSILVER,
            title: "Quicksilver",
            text: "#REDIRECT [[Mercury (element)]]",
        },
        FixturePage {
            id: MERCURY_REDIRECT,
            title: "Mercury (disambiguation)",
            text: "#REDIRECT [[Mercury]]",
        },
        FixturePage {
            id: QUECKSILBER,
            title: "Quecksilber",
            text: "#REDIRECT [[Mercury]]",
        },
    ]
}

fn page_xml(page: &FixturePage) -> String {
    format!(
        "  <page>\n    <title>{}</title>\n    <ns>0</ns>\n    <id>{}</id>\n    <revision>\n      \
         <model>wikitext</model>\n      <format>text/x-wiki</format>\n      <text>{}</text>\n    \
         </revision>\n  </page>\n",
        page.title, page.id, page.text
    )
}

/// Write a bzip2-compressed XML dump of `pages`
pub fn write_dump(path: &Path, pages: &[FixturePage]) {
    let mut xml = String::from("<mediawiki xmlns=\"http://www.mediawiki.org/xml/export-0.10/\">\n");
    for page in pages {
        xml.push_str(&page_xml(page));
    }
    xml.push_str("</mediawiki>\n");

    let mut encoder = BzEncoder::new(File::create(path).unwrap(), bzip2::Compression::default());
    encoder.write_all(xml.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

fn write_gz(path: &Path, text: &str) {
    let mut encoder = GzEncoder::new(File::create(path).unwrap(), Compression::default());
    encoder.write_all(text.as_bytes()).unwrap();
    encoder.finish().unwrap();
}

/// Write a gzipped `page` table dump holding the given categories
pub fn write_page_table(path: &Path, categories: &[(u64, &str)]) {
    let rows: Vec<String> = categories
        .iter()
        .map(|(id, title)| format!("({},14,'{}',0,0)", id, title))
        .collect();
    write_gz(
        path,
        &format!(
            "-- MySQL dump\nINSERT INTO `page` VALUES {},(1,0,'Not_a_category',0,0);\n",
            rows.join(",")
        ),
    );
}

/// A `categorylinks` row: `(from, category title, "page" | "subcat")`
pub type CategoryLink<'a> = (u64, &'a str, &'a str);

/// Write a gzipped `categorylinks` table dump
pub fn write_category_links(path: &Path, links: &[CategoryLink]) {
    let rows: Vec<String> = links
        .iter()
        .map(|(from, to, kind)| {
            format!(
                "({},'{}','SORTKEY','2020-01-01 00:00:00','','uca','{}')",
                from, to, kind
            )
        })
        .collect();
    write_gz(
        path,
        &format!("INSERT INTO `categorylinks` VALUES {};\n", rows.join(",")),
    );
}

/// Fixture files on disk; removed when dropped
pub struct Fixture {
    pub dir: TempDir,
    pub inputs: BuildInputs,
}

impl Fixture {
    pub fn db_path(&self) -> PathBuf {
        self.dir.path().join("wikisense.db")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }
}

/// The Mercury corpus with the given category tables
pub fn mercury_fixture(links: &[CategoryLink], categories: &[(u64, &str)]) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let inputs = BuildInputs {
        dump: dir.path().join("pages-articles.xml.bz2"),
        page_table: dir.path().join("page.sql.gz"),
        categorylinks: dir.path().join("categorylinks.sql.gz"),
        output_dir: dir.path().join("tokens"),
    };
    write_dump(&inputs.dump, &mercury_pages());
    write_page_table(&inputs.page_table, categories);
    write_category_links(&inputs.categorylinks, links);
    Fixture { dir, inputs }
}

/// The standard fixture: `Mercury` is a member of `Disambiguation_pages`
pub fn standard_fixture() -> Fixture {
    mercury_fixture(
        &[
            (MERCURY_DISAMBIGUATION, "Disambiguation_pages", "page"),
            (PLANET, "Planets", "page"),
        ],
        &[(DISAMBIGUATION_CATEGORY, "Disambiguation_pages"), (901, "Planets")],
    )
}

/// Small pools and every threshold at one mention
pub fn small_config() -> PipelineConfig {
    PipelineConfig {
        parse_workers: 2,
        tokenize_workers: 2,
        page_queue_capacity: 4,
        paragraph_queue_capacity: 4,
        writer_queue_capacity: 8,
        write_batch_size: 3,
        shard_count: 2,
        chunk_size: 4096,
        split_fractions: vec![0.5],
        min_sense_evidence: 1,
        min_matching_mentions: 1,
        ..PipelineConfig::default()
    }
}
