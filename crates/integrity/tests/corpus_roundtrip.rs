use std::collections::BTreeSet;

use scriptum_integrity::corpus::{
    deserialize_corpus, generate_seed_corpus, replay_corpus, serialize_corpus, CorpusCategory,
    CorpusConfig,
};

#[test]
fn default_corpus_round_trips_exactly() {
    let entries = generate_seed_corpus(&CorpusConfig::default()).unwrap();
    assert!(entries.len() >= 50, "expected at least 50 entries, got {}", entries.len());

    let categories: BTreeSet<CorpusCategory> = entries.iter().map(|entry| entry.category).collect();
    assert_eq!(categories.into_iter().collect::<Vec<_>>(), CorpusCategory::ALL.to_vec());

    let encoded = serialize_corpus(&entries).unwrap();
    assert_eq!(deserialize_corpus(&encoded).unwrap(), entries);
}

#[test]
fn serialized_corpus_is_a_plain_json_array() {
    let entries = generate_seed_corpus(&CorpusConfig { seed: 1, per_category: 1 }).unwrap();
    let serialized = serialize_corpus(&entries).unwrap();
    let value: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    let array = value.as_array().expect("corpus is a JSON array");
    assert_eq!(array.len(), entries.len());
    assert_eq!(array[0]["category"], "text_edit");
    assert_eq!(array[0]["op"]["op"], "text_edit");
    assert_eq!(array[0]["pre_op_checksum"].as_str().map(str::len), Some(64));
}

#[test]
fn corpus_file_replays_after_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corpus.json");

    let entries = generate_seed_corpus(&CorpusConfig { seed: 77, per_category: 6 }).unwrap();
    std::fs::write(&path, serialize_corpus(&entries).unwrap()).unwrap();

    let loaded = deserialize_corpus(&std::fs::read_to_string(&path).unwrap()).unwrap();
    let doc = replay_corpus(&loaded).unwrap();
    assert_eq!(doc.document_checksum().checksum, loaded.last().unwrap().post_op_checksum);
}

#[test]
fn many_seeds_generate_replayable_corpora() {
    for seed in 0..20u64 {
        let entries = generate_seed_corpus(&CorpusConfig { seed, per_category: 5 }).unwrap();
        assert_eq!(entries.len(), 5 * CorpusCategory::ALL.len(), "seed {seed}");
        replay_corpus(&entries).unwrap_or_else(|error| panic!("seed {seed}: {error}"));
    }
}
