//! Cross-validation fold assignment.
//!
//! Folds are a seeded shuffle of the sample indices dealt round-robin, so
//! every index lands in exactly one fold and fold sizes differ by at most
//! one. The assignment is created once per run and read-only afterwards.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

#[derive(Clone, Debug)]
pub struct FoldAssignment {
    folds: Vec<Vec<usize>>,
}

impl FoldAssignment {
    pub fn new(n_samples: usize, k: usize, seed: u64) -> Self {
        debug_assert!(k >= 2 && k <= n_samples, "fold count validated upstream");
        let mut indices: Vec<usize> = (0..n_samples).collect();
        let mut rng = StdRng::seed_from_u64(seed);
        indices.shuffle(&mut rng);
        let mut folds = vec![Vec::with_capacity(n_samples / k + 1); k];
        for (pos, idx) in indices.into_iter().enumerate() {
            folds[pos % k].push(idx);
        }
        for fold in &mut folds {
            fold.sort_unstable();
        }
        Self { folds }
    }

    pub fn count(&self) -> usize {
        self.folds.len()
    }

    /// Held-out sample indices of one fold, sorted.
    pub fn validation(&self, fold: usize) -> &[usize] {
        &self.folds[fold]
    }

    /// Training indices of one fold: the sorted complement of `validation`.
    pub fn training(&self, fold: usize) -> Vec<usize> {
        let held_out = &self.folds[fold];
        let n: usize = self.folds.iter().map(Vec::len).sum();
        let mut out = Vec::with_capacity(n - held_out.len());
        let mut cursor = 0;
        for i in 0..n {
            if cursor < held_out.len() && held_out[cursor] == i {
                cursor += 1;
            } else {
                out.push(i);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_partition_every_index_exactly_once() {
        for (n, k) in [(10, 2), (11, 3), (100, 5), (7, 7)] {
            let assignment = FoldAssignment::new(n, k, 42);
            let mut seen = vec![0usize; n];
            for f in 0..assignment.count() {
                for &i in assignment.validation(f) {
                    seen[i] += 1;
                }
            }
            assert!(
                seen.iter().all(|&c| c == 1),
                "every index must appear in exactly one fold (n={n}, k={k})"
            );
        }
    }

    #[test]
    fn fold_sizes_differ_by_at_most_one() {
        let assignment = FoldAssignment::new(103, 5, 0);
        let sizes: Vec<usize> = (0..5).map(|f| assignment.validation(f).len()).collect();
        let min = *sizes.iter().min().expect("non-empty");
        let max = *sizes.iter().max().expect("non-empty");
        assert!(max - min <= 1);
    }

    #[test]
    fn training_is_the_sorted_complement() {
        let assignment = FoldAssignment::new(20, 4, 7);
        for f in 0..4 {
            let mut all: Vec<usize> = assignment.training(f).to_vec();
            all.extend_from_slice(assignment.validation(f));
            all.sort_unstable();
            assert_eq!(all, (0..20).collect::<Vec<usize>>());
        }
    }

    #[test]
    fn same_seed_reproduces_the_same_folds() {
        let a = FoldAssignment::new(50, 5, 9);
        let b = FoldAssignment::new(50, 5, 9);
        for f in 0..5 {
            assert_eq!(a.validation(f), b.validation(f));
        }
    }
}
