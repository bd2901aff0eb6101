//! Plain [RANSAC](https://en.wikipedia.org/wiki/Random_sample_consensus)
//! over the [`sample_consensus`] traits.
//!
//! The engine repeatedly draws a minimal sample without replacement, asks the
//! [`Estimator`] for candidate models, scores every datum against each
//! candidate with the model's residual, and keeps the model with the most
//! inliers under the distance threshold.
//!
//! Two properties are guaranteed and relied upon by callers:
//!
//! * **Determinism** — the engine owns its RNG. Constructing it with a seeded
//!   RNG makes `model`/`model_inliers` a pure function of the input data:
//!   the same seed and the same data always reproduce the same model and the
//!   same inlier set.
//! * **First-found-wins** — a candidate replaces the best model only with a
//!   strictly greater inlier count. On ties the earlier candidate is kept,
//!   both across iterations and within the candidate order of a single
//!   estimator invocation.
//!
//! An estimator producing zero candidates for a degenerate sample simply
//! skips the iteration; it is not an error. The engine itself fails (returns
//! `None`) only when the input is smaller than the minimal sample size or
//! when no candidate ever gathered at least a minimal sample's worth of
//! inliers.
//!
//! Instances are reusable across calls but, holding mutable RNG state, are
//! not usable from multiple threads at once.

use rand::Rng;
use sample_consensus::{Consensus, Estimator, Model};

/// The RANSAC consensus process.
///
/// ```
/// use rand::{rngs::SmallRng, SeedableRng};
/// use ransac::Ransac;
/// let mut ransac = Ransac::new(0.1, SmallRng::seed_from_u64(0)).max_iterations(500);
/// # let _ = &mut ransac;
/// ```
pub struct Ransac<R> {
    /// Residuals strictly below this threshold count as inliers.
    pub inlier_threshold: f64,
    /// Number of minimal samples drawn before settling on the best model.
    pub max_iterations: usize,
    rng: R,
}

impl<R> Ransac<R>
where
    R: Rng,
{
    /// Creates the engine with the given inlier threshold and random number
    /// generator, with the default of `1000` iterations.
    ///
    /// Seed the RNG explicitly if reproducible results are required.
    pub fn new(inlier_threshold: f64, rng: R) -> Self {
        Self {
            inlier_threshold,
            max_iterations: 1000,
            rng,
        }
    }

    /// Sets the number of iterations the sampling loop runs.
    #[must_use]
    pub fn max_iterations(self, max_iterations: usize) -> Self {
        Self {
            max_iterations,
            ..self
        }
    }

    /// Counts the data whose residual against the model is strictly below
    /// the inlier threshold.
    fn count_inliers<E, B, I>(&self, model: &E::Model, data: I) -> usize
    where
        E: Estimator<B>,
        I: Iterator<Item = B>,
    {
        data.filter(|datum| model.residual(datum).abs() < self.inlier_threshold)
            .count()
    }
}

impl<E, R, B> Consensus<E, B> for Ransac<R>
where
    E: Estimator<B>,
    R: Rng,
{
    type Inliers = Vec<usize>;

    fn model<I>(&mut self, estimator: &E, data: I) -> Option<E::Model>
    where
        I: Iterator<Item = B> + Clone,
    {
        self.model_inliers(estimator, data).map(|(model, _)| model)
    }

    fn model_inliers<I>(&mut self, estimator: &E, data: I) -> Option<(E::Model, Self::Inliers)>
    where
        I: Iterator<Item = B> + Clone,
    {
        let len = data.clone().count();
        if len < E::MIN_SAMPLES {
            return None;
        }

        let mut best: Option<(E::Model, usize)> = None;
        for _ in 0..self.max_iterations {
            let chosen = rand::seq::index::sample(&mut self.rng, len, E::MIN_SAMPLES).into_vec();
            let subset = data
                .clone()
                .enumerate()
                .filter(|(ix, _)| chosen.contains(ix))
                .map(|(_, datum)| datum);
            // A degenerate sample legitimately produces no candidates; the
            // iteration is simply skipped.
            for candidate in estimator.estimate(subset) {
                let inliers = self.count_inliers::<E, B, _>(&candidate, data.clone());
                if inliers >= E::MIN_SAMPLES
                    && inliers > best.as_ref().map(|&(_, count)| count).unwrap_or(0)
                {
                    best = Some((candidate, inliers));
                }
            }
        }

        best.map(|(model, _)| {
            let inliers = data
                .enumerate()
                .filter(|(_, datum)| model.residual(datum).abs() < self.inlier_threshold)
                .map(|(ix, _)| ix)
                .collect();
            (model, inliers)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::SmallRng, SeedableRng};

    /// A one-dimensional location model for exercising the engine itself.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Location(f64);

    impl Model<f64> for Location {
        fn residual(&self, data: &f64) -> f64 {
            self.0 - data
        }
    }

    /// Proposes the sampled value itself as the model.
    struct LocationEstimator;

    impl Estimator<f64> for LocationEstimator {
        type Model = Location;
        type ModelIter = Option<Location>;
        const MIN_SAMPLES: usize = 1;

        fn estimate<I>(&self, mut data: I) -> Self::ModelIter
        where
            I: Iterator<Item = f64> + Clone,
        {
            data.next().map(Location)
        }
    }

    #[test]
    fn finds_the_dominant_cluster() {
        let mut data: Vec<f64> = (0..30).map(|i| 5.0 + 0.001 * i as f64).collect();
        data.extend((0..10).map(|i| 100.0 + 10.0 * i as f64));
        let mut ransac = Ransac::new(0.5, SmallRng::seed_from_u64(7));
        let (model, inliers) = ransac
            .model_inliers(&LocationEstimator, data.iter().cloned())
            .unwrap();
        assert!((model.0 - 5.0).abs() < 0.1);
        assert_eq!(inliers.len(), 30);
        // Inlier indices preserve input order.
        assert!(inliers.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn too_few_data_fails_immediately() {
        let mut ransac = Ransac::new(0.5, SmallRng::seed_from_u64(0));
        let empty: Vec<f64> = Vec::new();
        assert!(ransac.model(&LocationEstimator, empty.iter().cloned()).is_none());
    }

    #[test]
    fn same_seed_reproduces_the_result() {
        let data: Vec<f64> = (0..50).map(|i| (i as f64 * 7.3) % 13.0).collect();
        let run = |seed: u64| {
            let mut ransac = Ransac::new(1.0, SmallRng::seed_from_u64(seed)).max_iterations(64);
            ransac
                .model_inliers(&LocationEstimator, data.iter().cloned())
                .unwrap()
        };
        let (model_a, inliers_a) = run(42);
        let (model_b, inliers_b) = run(42);
        assert_eq!(model_a, model_b);
        assert_eq!(inliers_a, inliers_b);
    }

    #[test]
    fn ties_keep_the_first_found_model() {
        // Two clusters of identical size; whichever is sampled first must be
        // kept no matter how many times the other is proposed afterwards.
        let mut data: Vec<f64> = (0..10).map(|_| 0.0).collect();
        data.extend((0..10).map(|_| 50.0));
        let mut ransac = Ransac::new(0.5, SmallRng::seed_from_u64(3)).max_iterations(100);
        let first = ransac
            .model(&LocationEstimator, data.iter().cloned())
            .unwrap();
        // Replaying the identical sampling sequence, the first sampled datum
        // determines the winner.
        let mut rng = SmallRng::seed_from_u64(3);
        let first_index = rand::seq::index::sample(&mut rng, data.len(), 1).index(0);
        assert_eq!(first.0, data[first_index]);
    }
}
