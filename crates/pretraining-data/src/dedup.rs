use crate::preprocessing::CleanedText;
use std::collections::HashSet;

/// Run-wide exact-duplicate filter keyed on content digests. It has a single
/// owner; parallel producers hand it their results rather than sharing it.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<u128>,
    duplicates: usize,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a digest is offered, false for every repeat.
    pub fn admit(&mut self, text: &CleanedText) -> bool {
        let fresh = self.seen.insert(text.digest);
        if !fresh {
            self.duplicates += 1;
        }
        fresh
    }

    /// Admits a batch, returning the texts seen for the first time in input order.
    pub fn admit_all(&mut self, batch: Vec<CleanedText>) -> Vec<String> {
        batch
            .into_iter()
            .filter(|text| self.admit(text))
            .map(|text| text.text)
            .collect()
    }

    pub fn accepted(&self) -> usize {
        self.seen.len()
    }

    pub fn duplicates(&self) -> usize {
        self.duplicates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<CleanedText> {
        items.iter().map(|s| CleanedText::new(s.to_string())).collect()
    }

    #[test]
    fn keeps_first_occurrence_across_batches() {
        let mut dedup = Deduplicator::new();
        let first = dedup.admit_all(texts(&["ev", "okul", "ev"]));
        let second = dedup.admit_all(texts(&["okul", "bahçe"]));
        assert_eq!(first, vec!["ev", "okul"]);
        assert_eq!(second, vec!["bahçe"]);
        assert_eq!(dedup.accepted(), 3);
        assert_eq!(dedup.duplicates(), 2);
    }

    #[test]
    fn second_pass_is_identity() {
        let mut first_pass = Deduplicator::new();
        let once = first_pass.admit_all(texts(&["a", "b", "a", "c", "b"]));

        let mut second_pass = Deduplicator::new();
        let again: Vec<CleanedText> = once.iter().map(|t| CleanedText::new(t.clone())).collect();
        let twice = second_pass.admit_all(again);
        assert_eq!(once, twice);
        assert_eq!(second_pass.duplicates(), 0);
    }
}
