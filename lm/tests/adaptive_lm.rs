use mmt_core::{ContextScore, Options, UpdateId, VOCABULARY_END_SYMBOL};
use mmt_lm::{AdaptiveLm, HistoryKey, LOG_ZERO};

fn options() -> Options {
    let mut options = Options::default();
    options.lm.order = 3;
    options.lm.gc_timeout_secs = 3600.0;
    options.updates.max_delay_secs = 3600.0;
    options
}

/// Memory 1 holds `5 6 7` and `5 6 8`.
fn load(dir: &std::path::Path) -> AdaptiveLm {
    let lm = AdaptiveLm::open(dir, &options()).unwrap();
    lm.add(UpdateId::new(0, 0), 1, vec![5, 6, 7]).unwrap();
    lm.add(UpdateId::new(0, 1), 1, vec![5, 6, 8]).unwrap();
    lm.flush().unwrap();
    lm
}

fn assert_log_prob(actual: f32, probability: f64) {
    let expected = probability.ln() as f32;
    assert!((actual - expected).abs() < 1e-5, "{actual} != {expected}");
}

#[test]
fn interpolated_estimates_back_off_to_unigrams() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    let context = [ContextScore::new(1, 1.0)];

    // f*(6|5) = 2/3, λ(5) = 1/3, p(6) = (2+1)/(8+5+5)
    let (log_prob, history) = lm
        .compute_probability(6, &lm.make_history_key(&[5]), &context, None)
        .unwrap();
    assert_log_prob(log_prob, 2.0 / 3.0 + 1.0 / 3.0 * 3.0 / 18.0);
    assert_eq!(history.words(), &[5, 6]);

    // p(7|6) = 1/4 + 1/2 · 2/18, p(7|5 6) = 1/4 + 1/2 · p(7|6)
    let (log_prob, history) = lm.compute_probability(7, &history, &context, None).unwrap();
    let lower = 0.25 + 0.5 * 2.0 / 18.0;
    assert_log_prob(log_prob, 0.25 + 0.5 * lower);
    assert_eq!(history.words(), &[6, 7]);

    let (_, history) = lm
        .compute_probability(VOCABULARY_END_SYMBOL, &history, &context, None)
        .unwrap();
    assert!(history.is_empty());
}

#[test]
fn cached_results_match_uncached_ones() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    let context = [ContextScore::new(1, 1.0)];
    let mut cache = lm.new_cache().unwrap();

    let history = lm.make_history_key(&[5, 6]);
    for word in [7, 8, 5, 42] {
        let plain = lm.compute_probability(word, &history, &context, None).unwrap();
        let first = lm.compute_probability(word, &history, &context, Some(&mut cache)).unwrap();
        let second = lm.compute_probability(word, &history, &context, Some(&mut cache)).unwrap();
        assert_eq!(plain, first);
        assert_eq!(first, second);
    }
    assert!(!cache.is_empty());
}

#[test]
fn unknown_words_get_the_oov_class_mass() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    let context = [ContextScore::new(1, 1.0)];

    assert!(lm.is_oov(&context, 42).unwrap());
    assert!(!lm.is_oov(&context, 7).unwrap());

    let (log_prob, history) = lm
        .compute_probability(42, &HistoryKey::default(), &context, None)
        .unwrap();
    assert_log_prob(log_prob, 6.0 / 18.0 / (10_000_000.0 - 5.0));
    assert!(log_prob > LOG_ZERO);
    assert!(history.is_empty());
}

#[test]
fn empty_context_is_log_zero() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    let (log_prob, history) = lm
        .compute_probability(6, &lm.make_history_key(&[5]), &[], None)
        .unwrap();
    assert_eq!(log_prob, LOG_ZERO);
    assert!(history.is_empty());

    let unknown_memory = [ContextScore::new(9, 1.0)];
    let (log_prob, _) = lm.compute_probability(6, &HistoryKey::default(), &unknown_memory, None).unwrap();
    assert_eq!(log_prob, LOG_ZERO);
}

#[test]
fn history_keeps_order_minus_one_words() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    assert_eq!(lm.make_history_key(&[1, 2, 3, 4]).words(), &[3, 4]);
    assert_eq!(lm.make_history_key(&[4]).words(), &[4]);
}

#[test]
fn context_normalization_skips_empty_memories() {
    let dir = tempfile::tempdir().unwrap();
    let lm = load(dir.path());
    lm.add(UpdateId::new(0, 2), 2, vec![9]).unwrap();
    lm.flush().unwrap();

    let context = lm
        .normalize_context(&[
            ContextScore::new(1, 3.0),
            ContextScore::new(7, 4.0),
            ContextScore::new(2, 1.0),
        ])
        .unwrap();
    assert_eq!(context.len(), 2);
    assert!((context[0].score - 0.75).abs() < 1e-6);
    assert!((context[1].score - 0.25).abs() < 1e-6);
}

#[test]
fn reserved_words_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let lm = AdaptiveLm::open(dir.path(), &options()).unwrap();
    assert!(lm.add(UpdateId::new(0, 0), 1, vec![5, VOCABULARY_END_SYMBOL]).is_err());
    assert!(lm.add(UpdateId::new(0, 0), 1, vec![0]).is_err());
}
