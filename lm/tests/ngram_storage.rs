use mmt_core::codec::hash_words;
use mmt_core::{MemoryId, Options, Progress, UpdateId, WordId};
use mmt_lm::{AdaptiveLm, Counts, NGramStorage};
use std::path::Path;

fn options(gc_batch_size: usize) -> Options {
    let mut options = Options::default();
    options.lm.order = 3;
    options.lm.gc_batch_size = gc_batch_size;
    options.lm.gc_timeout_secs = 3600.0;
    options.updates.max_delay_secs = 3600.0;
    options
}

fn sentences(memory: MemoryId) -> Vec<Vec<WordId>> {
    let base = memory * 100;
    (0..5).map(|i| vec![5, 6, base + i, 7, base + i % 2]).collect()
}

fn add_memory(lm: &AdaptiveLm, stream: u16, memory: MemoryId) {
    for (seq, sentence) in sentences(memory).into_iter().enumerate() {
        lm.add(UpdateId::new(stream, seq as i64), memory, sentence).unwrap();
    }
}

fn entries(storage: &NGramStorage) -> Vec<(MemoryId, u64, Counts)> {
    let mut entries: Vec<_> = storage.iter().unwrap().collect();
    entries.sort_by_key(|(memory, hash, _)| (*memory, *hash));
    entries
}

fn rebuild_without_memory_one(dir: &Path) -> (Vec<(MemoryId, u64, Counts)>, u64) {
    let lm = AdaptiveLm::open(dir, &options(100)).unwrap();
    add_memory(&lm, 1, 2);
    lm.flush().unwrap();
    let storage = lm.storage();
    (entries(storage), storage.estimate_size().unwrap())
}

#[test]
fn counts_and_successors_follow_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(dir.path(), &options(100)).unwrap();
    lm.add(UpdateId::new(0, 0), 1, vec![5, 6, 7]).unwrap();
    lm.add(UpdateId::new(0, 1), 1, vec![5, 6, 8]).unwrap();
    lm.flush().unwrap();

    let storage = lm.storage();
    // 5 6 7 </s> 5 6 8 </s>
    assert_eq!(storage.get_word_counts(1).unwrap(), Counts::new(8, 5));
    assert_eq!(storage.get_counts(1, hash_words(&[5, 6])).unwrap(), Counts::new(2, 2));
    assert_eq!(storage.get_counts(1, hash_words(&[6])).unwrap(), Counts::new(2, 2));
    assert_eq!(storage.get_counts(1, hash_words(&[5])).unwrap(), Counts::new(2, 1));
    assert_eq!(storage.get_counts(1, hash_words(&[5, 6, 7])).unwrap(), Counts::new(1, 0));

    lm.add(UpdateId::new(0, 2), 1, vec![5, 6, 9]).unwrap();
    lm.flush().unwrap();
    assert_eq!(storage.get_word_counts(1).unwrap(), Counts::new(12, 6));
    assert_eq!(storage.get_counts(1, hash_words(&[5, 6])).unwrap(), Counts::new(3, 3));
    assert_eq!(storage.get_counts(1, hash_words(&[6])).unwrap(), Counts::new(3, 3));
    assert_eq!(storage.get_counts(1, hash_words(&[5])).unwrap(), Counts::new(3, 1));
    assert_eq!(storage.get_counts(2, hash_words(&[5])).unwrap(), Counts::default());
}

#[test]
fn incremental_batches_match_a_single_batch() {
    let single = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(single.path(), &options(100)).unwrap();
    add_memory(&lm, 0, 1);
    lm.flush().unwrap();
    let expected = entries(lm.storage());

    let incremental = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(incremental.path(), &options(100)).unwrap();
    for (seq, sentence) in sentences(1).into_iter().enumerate() {
        lm.add(UpdateId::new(0, seq as i64), 1, sentence).unwrap();
        lm.flush().unwrap();
    }
    assert_eq!(entries(lm.storage()), expected);
}

#[test]
fn replayed_updates_are_counted_once() {
    let dir = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(dir.path(), &options(100)).unwrap();
    lm.add(UpdateId::new(3, 7), 1, vec![5, 6]).unwrap();
    lm.flush().unwrap();
    lm.add(UpdateId::new(3, 7), 1, vec![5, 6]).unwrap();
    lm.add(UpdateId::new(3, 2), 1, vec![5, 6]).unwrap();
    lm.flush().unwrap();
    assert_eq!(lm.storage().get_counts(1, hash_words(&[5, 6])).unwrap().count, 1);
    assert_eq!(lm.get_latest_updates_identifier()[&3], 7);
}

#[test]
fn deleted_memory_is_hidden_then_reclaimed() {
    let dir = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(dir.path(), &options(100)).unwrap();
    add_memory(&lm, 0, 1);
    add_memory(&lm, 1, 2);
    lm.flush().unwrap();

    lm.delete(UpdateId::new(2, 0), 1).unwrap();
    lm.flush().unwrap();
    let storage = lm.storage();
    assert_eq!(storage.get_word_counts(1).unwrap(), Counts::default());
    assert!(entries(storage).iter().all(|(memory, _, _)| *memory == 2));
    assert_eq!(storage.garbage_backlog(), vec![(1, 0)]);

    assert_eq!(storage.collect_garbage(None).unwrap(), Progress::Idle);
    assert!(storage.garbage_backlog().is_empty());
    assert!(storage.store().retired().unwrap().is_empty());

    let rebuilt = tempfile::tempdir().unwrap();
    assert_eq!(
        (entries(storage), storage.estimate_size().unwrap()),
        rebuild_without_memory_one(rebuilt.path())
    );

    // the recreated memory counts from scratch in a new generation
    lm.add(UpdateId::new(2, 1), 1, vec![5, 6]).unwrap();
    lm.flush().unwrap();
    assert_eq!(storage.store().generation(1), Some(1));
    assert_eq!(storage.get_word_counts(1).unwrap(), Counts::new(3, 3));
}

#[test]
fn interrupted_deletion_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let opts = options(4);
    {
        let lm = AdaptiveLm::open(dir.path(), &opts).unwrap();
        add_memory(&lm, 0, 1);
        add_memory(&lm, 1, 2);
        lm.flush().unwrap();
        lm.delete(UpdateId::new(2, 0), 1).unwrap();
        lm.flush().unwrap();

        let storage = lm.storage();
        assert_eq!(storage.collect_garbage(Some(2)).unwrap(), Progress::Pending);
        lm.close().unwrap();
    }

    let lm = AdaptiveLm::open(dir.path(), &opts).unwrap();
    let storage = lm.storage();
    assert_eq!(storage.garbage_backlog(), vec![(1, 0)]);
    assert_eq!(storage.collect_garbage(Some(1)).unwrap(), Progress::Pending);
    assert_eq!(storage.collect_garbage(None).unwrap(), Progress::Idle);

    let rebuilt = tempfile::tempdir().unwrap();
    assert_eq!(
        (entries(storage), storage.estimate_size().unwrap()),
        rebuild_without_memory_one(rebuilt.path())
    );
}

#[test]
fn order_is_fixed_at_creation() {
    let dir = tempfile::tempdir().unwrap();
    drop(NGramStorage::open(dir.path(), &options(100)).unwrap());
    let mut other = options(100);
    other.lm.order = 4;
    assert!(NGramStorage::open(dir.path(), &other).is_err());
}
