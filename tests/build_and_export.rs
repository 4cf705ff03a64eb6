//! End-to-end runs over the Mercury corpus: build, export, disambiguate

mod common;

use common::*;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use wikisense::markup::StaticTemplateExpander;
use wikisense::storage::BuildState;
use wikisense::tokenize::NamedDescriptor;
use wikisense::{
    run_build, run_export, BuildStats, Disambiguator, FeatureDescriptor, KnowledgeBase, PriorScorer,
    SenseLookup, ServingConfig, SimpleTokenizer,
};

async fn build(fixture: &Fixture) -> (Arc<KnowledgeBase>, BuildStats) {
    let kb = Arc::new(KnowledgeBase::open(fixture.db_path()).unwrap());
    let stats = run_build(
        Arc::clone(&kb),
        fixture.inputs.clone(),
        &small_config(),
        Arc::new(SimpleTokenizer),
        Arc::new(StaticTemplateExpander::with_defaults()),
    )
    .await
    .unwrap();
    (kb, stats)
}

fn read_lines(path: &Path) -> Vec<serde_json::Value> {
    BufReader::new(MultiGzDecoder::new(File::open(path).unwrap()))
        .lines()
        .map(|line| serde_json::from_str(&line.unwrap()).unwrap())
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn build_collects_senses_and_examples() {
    let fixture = standard_fixture();
    let (kb, stats) = build(&fixture).await;

    assert_eq!(stats.pages, 9);
    assert_eq!(stats.articles, 6);
    assert_eq!(stats.redirects, 3);
    assert_eq!(stats.paragraphs, 9);
    assert_eq!(stats.disambiguation_pages, 1);
    assert_eq!(stats.resolved_links, 7);
    assert_eq!(stats.unknown_link_articles, 0);
    assert_eq!(stats.sense_groups, 1);
    assert_eq!(stats.senses, 3);
    // planet: 3 paragraphs + 1 sentence, element: 1 + 2, mythology: 1 + 1
    assert_eq!(stats.examples, 9);
    assert_eq!(stats.held_out, 5);
    assert_eq!(stats.shortfalls, 0);

    assert_eq!(kb.build_state().unwrap(), Some(BuildState::Complete));
    assert!(kb.built_at().unwrap().is_some());
    let table_sizes = kb.stats().unwrap();
    assert_eq!(table_sizes.senses, 3);
    assert_eq!(table_sizes.examples, 9);
    assert_eq!(table_sizes.redirects, 3);
    // "Mercury (disambiguation)" already groups under "mercury"
    assert_eq!(table_sizes.alternative_group_titles, 1);

    let groups = kb.ambiguous_groups().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].titles, vec!["mercury".to_string(), "quecksilber".to_string()]);
    assert_eq!(groups[0].sense_ids, vec![0, 1, 2]);

    // the best supported sense is the planet
    let location = kb.sense_location(0).unwrap().unwrap();
    assert_eq!(location.article_title, "Mercury_(planet)");
    assert_eq!(location.section_title, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn category_cycles_still_flag_members() {
    let fixture = mercury_fixture(
        &[
            (902, "Disambiguation_pages", "subcat"),
            (DISAMBIGUATION_CATEGORY, "Mythology_disambiguation_pages", "subcat"),
            (MERCURY_DISAMBIGUATION, "Mythology_disambiguation_pages", "page"),
        ],
        &[
            (DISAMBIGUATION_CATEGORY, "Disambiguation_pages"),
            (902, "Mythology_disambiguation_pages"),
        ],
    );
    let (_kb, stats) = build(&fixture).await;

    assert_eq!(stats.categories, 2);
    assert_eq!(stats.disambiguation_pages, 1);
    assert_eq!(stats.senses, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn no_seed_category_means_no_senses() {
    let fixture = mercury_fixture(&[(MERCURY_DISAMBIGUATION, "Planets", "page")], &[(901, "Planets")]);
    let (kb, stats) = build(&fixture).await;

    assert_eq!(stats.disambiguation_pages, 0);
    assert_eq!(stats.senses, 0);
    assert_eq!(stats.examples, 0);
    assert!(kb.ambiguous_groups().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_writes_every_descriptor_and_split() {
    let fixture = standard_fixture();
    let (kb, _) = build(&fixture).await;

    let descriptors: Vec<NamedDescriptor> = ["para,1,1,0,0,0,0", "sent,1,1,1,0,0,1"]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
    let output = fixture.output_dir();
    let stats = run_export(kb, &fixture.inputs.output_dir, &output, &descriptors, &small_config())
        .await
        .unwrap();

    assert_eq!(stats.infos, 9);
    assert_eq!(stats.paragraphs, 9);
    assert_eq!(stats.join_misses, 0);
    assert_eq!(stats.skipped, 0);
    assert_eq!(stats.examples, 18);
    assert_eq!(stats.written, 18);

    let saved = FeatureDescriptor::load(output.join("sent").join("feature_descriptor.json")).unwrap();
    assert!(saved.uses_sentences);
    assert!(saved.ignore_punctuation);

    let mut golds = std::collections::BTreeSet::new();
    for name in ["para", "sent"] {
        let train = read_lines(&output.join(name).join("train").join("train.000.jsonl.gz"));
        let dev = read_lines(&output.join(name).join("dev").join("dev.000.jsonl.gz"));
        assert_eq!(train.len(), 4, "{} train", name);
        assert_eq!(dev.len(), 5, "{} dev", name);

        for example in train.iter().chain(&dev) {
            assert_eq!(example["possible_senses"], serde_json::json!([0, 1, 2]));
            golds.insert(example["sense"].as_u64().unwrap());
            let tokens = example["tokens"].as_array().unwrap();
            assert!(!tokens.is_empty());
            assert!(tokens
                .iter()
                .all(|token| token.as_str().unwrap() == token.as_str().unwrap().to_lowercase()));
        }
    }

    // the Hermes sentence linking the god is labelled with the least supported sense
    assert_eq!(golds.into_iter().collect::<Vec<_>>(), vec![0, 1, 2]);

    // sentence examples drop the trailing full stop
    let sentences = read_lines(&output.join("sent").join("train").join("train.000.jsonl.gz"));
    assert!(sentences
        .iter()
        .all(|example| example["tokens"].as_array().unwrap().iter().all(|t| t.as_str() != Some("."))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn export_refuses_an_unfinished_knowledge_base() {
    let fixture = standard_fixture();
    let kb = Arc::new(KnowledgeBase::open(fixture.db_path()).unwrap());
    kb.begin_build().unwrap();

    let descriptors = vec!["para,1,0,0,0,0,0".parse::<NamedDescriptor>().unwrap()];
    let result = run_export(
        kb,
        &fixture.inputs.output_dir,
        &fixture.output_dir(),
        &descriptors,
        &small_config(),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disambiguates_with_the_built_inventory() {
    let fixture = standard_fixture();
    let (kb, _) = build(&fixture).await;

    let lookup: Arc<dyn SenseLookup> = kb;
    let disambiguator = Disambiguator::new(
        lookup,
        Arc::new(PriorScorer),
        Arc::new(SimpleTokenizer),
        FeatureDescriptor::default(),
        &ServingConfig::default(),
    )
    .unwrap();
    assert_eq!(disambiguator.phrase_count(), 2);

    assert!(disambiguator.disambiguate("").await.unwrap().is_empty());
    assert!(disambiguator.disambiguate("Venus is hot.").await.unwrap().is_empty());

    let text = "Mercury is hot.\n\nLiquid mercury is heavy.";
    let spans = disambiguator.disambiguate(text).await.unwrap();
    assert_eq!(spans.len(), 2);
    assert_eq!((spans[0].start, spans[0].end), (0, 7));
    assert_eq!((spans[1].start, spans[1].end), (24, 31));
    assert_eq!(&text[spans[1].start..spans[1].end], "mercury");
    for span in &spans {
        assert_eq!(span.sense_id, 0);
        assert_eq!(span.url, "https://en.wikipedia.org/wiki/Mercury_(planet)");
    }

    let spans = disambiguator.disambiguate("Quecksilber is heavy.").await.unwrap();
    assert_eq!(spans.len(), 1);
    assert_eq!((spans[0].start, spans[0].end, spans[0].sense_id), (0, 11, 0));

    disambiguator.shutdown().await.unwrap();
}
