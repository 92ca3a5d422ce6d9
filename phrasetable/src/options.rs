//! Phrase pair extraction from sampled sentence pairs.

use ahash::AHashMap;
use std::cmp::Ordering;

use mmt_core::{Alignment, Length, WordId};

use crate::collector::Sample;
use crate::orientation::{AlignmentMatrix, Orientation, OrientationCounts};

/// A target phrase aligned to the queried source phrase.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationOption {
    pub target_phrase: Vec<WordId>,
    /// Most frequent alignment, relative to the phrase pair.
    pub alignment: Alignment,
    pub count: usize,
    pub orientations: OrientationCounts,
}

#[derive(Debug, Clone)]
pub struct TranslationOptionBuilder {
    target_phrase: Vec<WordId>,
    alignments: AHashMap<Alignment, usize>,
    count: usize,
    orientations: OrientationCounts,
}

/// Shorter alignments first, then position by position.
fn compare_alignments(a: &Alignment, b: &Alignment) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

impl TranslationOptionBuilder {
    pub fn new(target_phrase: Vec<WordId>) -> Self {
        Self {
            target_phrase,
            alignments: AHashMap::new(),
            count: 0,
            orientations: OrientationCounts::default(),
        }
    }

    pub fn target_phrase(&self) -> &[WordId] {
        &self.target_phrase
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn orientations(&self) -> &OrientationCounts {
        &self.orientations
    }

    pub fn add(&mut self, alignment: Alignment, forward: Orientation, backward: Orientation) {
        *self.alignments.entry(alignment).or_insert(0) += 1;
        self.count += 1;
        self.orientations.add(forward, backward);
    }

    /// Highest count wins, ties go to the smaller alignment.
    pub fn best_alignment(&self) -> Option<&Alignment> {
        self.alignments
            .iter()
            .max_by(|(a, ca), (b, cb)| ca.cmp(cb).then_with(|| compare_alignments(b, a)))
            .map(|(alignment, _)| alignment)
    }

    pub fn build(self) -> TranslationOption {
        let alignment = self.best_alignment().cloned().unwrap_or_default();
        TranslationOption {
            target_phrase: self.target_phrase,
            alignment,
            count: self.count,
            orientations: self.orientations,
        }
    }

    /// Extracts every target phrase consistent with `source_phrase` at each
    /// matching offset of `samples`. Returns the builders together with the
    /// number of occurrences that produced at least one option.
    pub fn extract(source_phrase: &[WordId], samples: &[Sample]) -> (Vec<TranslationOptionBuilder>, usize) {
        let mut options: AHashMap<Vec<WordId>, TranslationOptionBuilder> = AHashMap::new();
        let mut valid = 0;
        for sample in samples {
            let mut target_aligned = vec![false; sample.target.len()];
            for &(_, t) in &sample.alignment {
                if let Some(aligned) = target_aligned.get_mut(t as usize) {
                    *aligned = true;
                }
            }
            for &offset in &sample.offsets {
                if extract_at(source_phrase.len(), sample, offset, &target_aligned, &mut options) {
                    valid += 1;
                }
            }
        }
        (options.into_values().collect(), valid)
    }
}

/// Extraction for one occurrence starting at source word `offset`.
fn extract_at(
    phrase_len: usize,
    sample: &Sample,
    offset: Length,
    target_aligned: &[bool],
    options: &mut AHashMap<Vec<WordId>, TranslationOptionBuilder>,
) -> bool {
    if phrase_len == 0 || sample.target.is_empty() {
        return false;
    }
    let source_start = offset as usize;
    let source_end = source_start + phrase_len - 1;
    let in_source = |s: Length| (source_start..=source_end).contains(&(s as usize));

    let Some((target_start, target_end)) = sample
        .alignment
        .iter()
        .filter(|(s, _)| in_source(*s))
        .fold(None, |span: Option<(usize, usize)>, &(_, t)| {
            let t = t as usize;
            Some(span.map_or((t, t), |(lo, hi)| (lo.min(t), hi.max(t))))
        })
    else {
        return false;
    };
    if target_end >= sample.target.len() {
        return false;
    }

    let mut in_bounds = Alignment::new();
    for &(s, t) in &sample.alignment {
        let source_inside = in_source(s);
        let target_inside = (target_start..=target_end).contains(&(t as usize));
        if source_inside != target_inside {
            return false;
        }
        if source_inside {
            in_bounds.push((s, t));
        }
    }

    let (forward, backward) = orientations(sample, source_start, source_end + 1);

    let mut ts = target_start;
    loop {
        let mut te = target_end;
        loop {
            let alignment = in_bounds
                .iter()
                .map(|&(s, t)| (s - offset, t - ts as Length))
                .collect();
            options
                .entry(sample.target[ts..=te].to_vec())
                .or_insert_with(|| TranslationOptionBuilder::new(sample.target[ts..=te].to_vec()))
                .add(alignment, forward, backward);

            te += 1;
            if te == sample.target.len() || target_aligned[te] {
                break;
            }
        }
        if ts == 0 || target_aligned[ts - 1] {
            break;
        }
        ts -= 1;
    }
    true
}

/// Orientations of the source span `start..stop` against the target words
/// it covers, `None` both ways when that span is not contiguous.
fn orientations(sample: &Sample, start: usize, stop: usize) -> (Orientation, Orientation) {
    let target_len = sample.target.len();
    let mut forbidden = vec![false; target_len];
    let (mut lft, mut rgt) = (target_len, 0);
    for &(s, t) in &sample.alignment {
        let (s, t) = (s as usize, t as usize);
        if t >= target_len {
            continue;
        }
        if s < start || s >= stop {
            forbidden[t] = true;
        } else {
            lft = lft.min(t);
            rgt = rgt.max(t);
        }
    }
    if lft > rgt || forbidden[lft..=rgt].iter().any(|&f| f) {
        return (Orientation::None, Orientation::None);
    }

    let mut s2 = lft;
    while s2 > 0 && !forbidden[s2 - 1] {
        s2 -= 1;
    }
    let mut e2 = rgt + 1;
    while e2 < target_len && !forbidden[e2] {
        e2 += 1;
    }

    let matrix = AlignmentMatrix::new(&sample.alignment, sample.source.len(), target_len);
    (
        matrix.forward_orientation(start, stop, e2),
        matrix.backward_orientation(start, stop, s2),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(source: &[WordId], target: &[WordId], alignment: &[(Length, Length)], offsets: &[Length]) -> Sample {
        Sample {
            memory: 1,
            source: source.to_vec(),
            target: target.to_vec(),
            alignment: alignment.to_vec(),
            offsets: offsets.to_vec(),
        }
    }

    #[test]
    fn unaligned_neighbours_extend_the_target_phrase() {
        // target word 21 is unaligned, so both [20] and [20, 21] are options
        let samples = vec![sample(&[10, 11], &[20, 21, 22], &[(0, 0), (1, 2)], &[0])];
        let (builders, valid) = TranslationOptionBuilder::extract(&[10], &samples);
        assert_eq!(valid, 1);
        let mut phrases: Vec<_> = builders.iter().map(|b| b.target_phrase().to_vec()).collect();
        phrases.sort();
        assert_eq!(phrases, vec![vec![20], vec![20, 21]]);
    }

    #[test]
    fn inconsistent_alignment_yields_nothing() {
        // target word 20 is aligned both inside and outside the phrase
        let samples = vec![sample(&[10, 11], &[20], &[(0, 0), (1, 0)], &[0])];
        let (builders, valid) = TranslationOptionBuilder::extract(&[10], &samples);
        assert!(builders.is_empty());
        assert_eq!(valid, 0);
    }

    #[test]
    fn counts_and_best_alignment_aggregate_across_samples() {
        let samples = vec![
            sample(&[1, 10, 11], &[5, 20, 21], &[(0, 0), (1, 1), (2, 2)], &[1]),
            sample(&[10, 11], &[20, 21], &[(0, 0), (1, 1)], &[0]),
            sample(&[10, 11], &[20, 21], &[(0, 1), (1, 0)], &[0]),
        ];
        let (builders, valid) = TranslationOptionBuilder::extract(&[10, 11], &samples);
        assert_eq!(valid, 3);
        assert_eq!(builders.len(), 1);
        let option = builders.into_iter().next().unwrap().build();
        assert_eq!(option.target_phrase, vec![20, 21]);
        assert_eq!(option.count, 3);
        assert_eq!(option.alignment, vec![(0, 0), (1, 1)]);
        assert_eq!(option.orientations.backward_count(Orientation::Monotonic), 3);
    }

    #[test]
    fn ties_prefer_the_smaller_alignment() {
        let mut builder = TranslationOptionBuilder::new(vec![7]);
        builder.add(vec![(0, 0), (1, 0)], Orientation::None, Orientation::None);
        builder.add(vec![(0, 0)], Orientation::None, Orientation::None);
        assert_eq!(builder.best_alignment(), Some(&vec![(0, 0)]));
        builder.add(vec![(0, 0), (1, 0)], Orientation::None, Orientation::None);
        assert_eq!(builder.best_alignment(), Some(&vec![(0, 0), (1, 0)]));
    }
}
