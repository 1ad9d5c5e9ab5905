use rand::seq::index;
use rand::Rng;
use rand_chacha::ChaCha8Rng;

/// Draw a bootstrap sample of `draw_count` rows with replacement,
/// returning the sampled rows and the out of bag rows. OOB rows
/// are found by marking every sampled row present and compacting
/// the absent indices, in ascending order.
pub fn sample_bootstrap(
    row_count: usize,
    draw_count: usize,
    rng: &mut ChaCha8Rng,
) -> (Vec<usize>, Vec<usize>) {
    let mut in_bag = vec![false; row_count];
    let mut sampled = Vec::with_capacity(draw_count);
    for _ in 0..draw_count {
        let idx = rng.gen_range(0..row_count);
        sampled.push(idx);
        in_bag[idx] = true;
    }
    let oob: Vec<usize> = (0..row_count).filter(|&i| !in_bag[i]).collect();
    (sampled, oob)
}

/// Per node candidate feature sampler.
pub struct FeatureSampler {
    pub column_count: usize,
    pub selected_count: usize,
}

impl FeatureSampler {
    /// The caller has already validated
    /// `selected_count <= column_count`.
    pub fn new(column_count: usize, selected_count: usize) -> Self {
        debug_assert!(selected_count <= column_count);
        debug_assert!(selected_count > 0);
        FeatureSampler {
            column_count,
            selected_count,
        }
    }

    /// Draw the candidate features for one node. When every
    /// feature is selected the identity sequence is returned and
    /// the engine is left untouched, so runs with and without
    /// column sampling consume the same random stream elsewhere.
    pub fn sample(&self, rng: &mut ChaCha8Rng) -> Vec<usize> {
        if self.selected_count == self.column_count {
            (0..self.column_count).collect()
        } else {
            index::sample(rng, self.column_count, self.selected_count).into_vec()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn test_bootstrap_partition() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let (sampled, oob) = sample_bootstrap(100, 63, &mut rng);
        assert_eq!(sampled.len(), 63);
        for &i in &sampled {
            assert!(i < 100);
            assert!(!oob.contains(&i));
        }
        // Every row is either in bag or out of bag.
        let mut in_bag = vec![false; 100];
        for &i in &sampled {
            in_bag[i] = true;
        }
        for (i, flag) in in_bag.iter().enumerate() {
            assert_eq!(oob.contains(&i), !flag);
        }
        // OOB list is ascending.
        assert!(oob.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_feature_sampler_identity() {
        let sampler = FeatureSampler::new(5, 5);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let before = rng.clone();
        assert_eq!(sampler.sample(&mut rng), vec![0, 1, 2, 3, 4]);
        // No randomness consumed.
        assert_eq!(rng, before);
    }

    #[test]
    fn test_feature_sampler_distinct() {
        let sampler = FeatureSampler::new(20, 6);
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..50 {
            let mut drawn = sampler.sample(&mut rng);
            assert_eq!(drawn.len(), 6);
            assert!(drawn.iter().all(|&f| f < 20));
            drawn.sort_unstable();
            drawn.dedup();
            assert_eq!(drawn.len(), 6);
        }
    }

    #[test]
    fn test_feature_sampler_reproducible() {
        let sampler = FeatureSampler::new(30, 10);
        let a: Vec<Vec<usize>> = {
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            (0..5).map(|_| sampler.sample(&mut rng)).collect()
        };
        let b: Vec<Vec<usize>> = {
            let mut rng = ChaCha8Rng::seed_from_u64(11);
            (0..5).map(|_| sampler.sample(&mut rng)).collect()
        };
        assert_eq!(a, b);
    }
}
