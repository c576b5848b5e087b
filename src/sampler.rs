//! Tree-structured Parzen estimator over independent parameters.
//!
//! After `n_startup_trials` uniform draws, completed trials are split into a
//! good set (lowest objective) and the rest. Each set becomes a truncated
//! Gaussian mixture over the parameter's internal range. Candidates are drawn
//! from the good mixture and the one maximising `log l(x) - log g(x)` wins.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::{Continuous, ContinuousCDF, Normal};

use crate::param_utils::{ParamSet, ParamSpec};

const DEFAULT_STARTUP_TRIALS: usize = 10;
const DEFAULT_EI_CANDIDATES: usize = 24;
const GOOD_SET_CAP: usize = 25;
const MIN_DENSITY: f64 = 1e-300;

#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub params: ParamSet,
    pub value: f64,
}

pub struct TpeSampler {
    rng: StdRng,
    n_startup_trials: usize,
    n_ei_candidates: usize,
    standard: Normal,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Result<Self> {
        Self::with_settings(seed, DEFAULT_STARTUP_TRIALS, DEFAULT_EI_CANDIDATES)
    }

    pub fn with_settings(seed: u64, n_startup_trials: usize, n_ei_candidates: usize) -> Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            n_startup_trials,
            n_ei_candidates: n_ei_candidates.max(1),
            standard: Normal::new(0.0, 1.0).context("Failed to build standard normal")?,
        })
    }

    /// Proposes the next parameter set given every finished trial.
    pub fn suggest(&mut self, space: &[ParamSpec], history: &[Trial]) -> ParamSet {
        let mut params = ParamSet::new();
        if history.len() < self.n_startup_trials {
            for spec in space {
                let (low, high) = spec.internal_bounds();
                let internal = low + (high - low) * self.rng.gen::<f64>();
                params.insert(spec.name.to_string(), spec.from_internal(internal));
            }
            return params;
        }

        let mut ranked: Vec<&Trial> = history.iter().collect();
        ranked.sort_by(|a, b| a.value.total_cmp(&b.value));
        let n_good = ((ranked.len() as f64 * 0.1).ceil() as usize).clamp(1, GOOD_SET_CAP);
        let (good, bad) = ranked.split_at(n_good.min(ranked.len()));

        for spec in space {
            let internal = self.suggest_one(spec, good, bad);
            params.insert(spec.name.to_string(), spec.from_internal(internal));
        }
        params
    }

    fn suggest_one(&mut self, spec: &ParamSpec, good: &[&Trial], bad: &[&Trial]) -> f64 {
        let (low, high) = spec.internal_bounds();
        let observations = |trials: &[&Trial]| -> Vec<f64> {
            trials
                .iter()
                .filter_map(|trial| trial.params.get(spec.name))
                .map(|value| spec.to_internal(*value).clamp(low, high))
                .collect()
        };
        let below = ParzenEstimator::new(&observations(good), low, high);
        let above = ParzenEstimator::new(&observations(bad), low, high);

        let mut best_point = (low + high) / 2.0;
        let mut best_score = f64::NEG_INFINITY;
        for _ in 0..self.n_ei_candidates {
            let candidate = below.sample(&mut self.rng, &self.standard);
            let score = below.log_density(candidate, &self.standard) - above.log_density(candidate, &self.standard);
            if score > best_score {
                best_score = score;
                best_point = candidate;
            }
        }
        best_point
    }
}

/// Equal-weight mixture of Gaussians truncated to `[low, high]`, including a
/// wide prior component centred on the range.
struct ParzenEstimator {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    low: f64,
    high: f64,
}

impl ParzenEstimator {
    fn new(observations: &[f64], low: f64, high: f64) -> Self {
        let range = (high - low).max(f64::EPSILON);
        let prior_mu = (low + high) / 2.0;
        let mut mus: Vec<f64> = observations.to_vec();
        mus.push(prior_mu);
        mus.sort_by(f64::total_cmp);

        let min_sigma = range / (100.0f64).min(1.0 + observations.len() as f64);
        let sigmas = (0..mus.len())
            .map(|index| {
                if mus.len() == 1 {
                    return range;
                }
                let left = if index == 0 { mus[index] - low } else { mus[index] - mus[index - 1] };
                let right = if index + 1 == mus.len() {
                    high - mus[index]
                } else {
                    mus[index + 1] - mus[index]
                };
                left.max(right).clamp(min_sigma, range)
            })
            .collect::<Vec<f64>>();
        // The prior keeps its full width.
        let sigmas = mus
            .iter()
            .zip(sigmas)
            .map(|(mu, sigma)| if *mu == prior_mu { range } else { sigma })
            .collect();

        Self { mus, sigmas, low, high }
    }

    fn sample(&self, rng: &mut StdRng, standard: &Normal) -> f64 {
        let component = rng.gen_range(0..self.mus.len());
        let (mu, sigma) = (self.mus[component], self.sigmas[component]);
        let lower = standard.cdf((self.low - mu) / sigma);
        let upper = standard.cdf((self.high - mu) / sigma);
        if upper - lower <= f64::EPSILON {
            return mu.clamp(self.low, self.high);
        }
        let u = lower + (upper - lower) * rng.gen::<f64>();
        let u = u.clamp(f64::EPSILON, 1.0 - f64::EPSILON);
        (mu + sigma * standard.inverse_cdf(u)).clamp(self.low, self.high)
    }

    fn log_density(&self, x: f64, standard: &Normal) -> f64 {
        let weight = 1.0 / self.mus.len() as f64;
        let density: f64 = self
            .mus
            .iter()
            .zip(&self.sigmas)
            .map(|(mu, sigma)| {
                let mass = standard.cdf((self.high - mu) / sigma) - standard.cdf((self.low - mu) / sigma);
                if mass <= 0.0 {
                    return 0.0;
                }
                weight * standard.pdf((x - mu) / sigma) / (sigma * mass)
            })
            .sum();
        density.max(MIN_DENSITY).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn space() -> Vec<ParamSpec> {
        vec![
            ParamSpec::integer("depth", 3.0, 10.0),
            ParamSpec::log("learning_rate", 0.01, 0.3),
            ParamSpec::linear("subsample", 0.6, 1.0),
        ]
    }

    fn run(seed: u64, trials: usize) -> Vec<Trial> {
        let space = space();
        let mut sampler = TpeSampler::new(seed).unwrap();
        let mut history = Vec::new();
        for _ in 0..trials {
            let params = sampler.suggest(&space, &history);
            let value = (params["learning_rate"].ln() - 0.1f64.ln()).powi(2) + (params["depth"] - 5.0).abs();
            history.push(Trial { params, value });
        }
        history
    }

    #[test]
    fn suggestions_stay_in_bounds() {
        let space = space();
        for trial in run(1, 40) {
            for spec in &space {
                assert!(spec.contains(trial.params[spec.name]), "{} = {}", spec.name, trial.params[spec.name]);
            }
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        assert_eq!(run(42, 25), run(42, 25));
        assert_ne!(run(42, 25), run(43, 25));
    }

    #[test]
    fn guided_phase_improves_on_random_phase() {
        let history = run(7, 60);
        let best_random = history[..10].iter().map(|trial| trial.value).fold(f64::INFINITY, f64::min);
        let best_overall = history.iter().map(|trial| trial.value).fold(f64::INFINITY, f64::min);
        assert!(best_overall <= best_random);
        assert!(best_overall < 1.5);
    }

    #[test]
    fn infinite_objectives_rank_last() {
        let space = space();
        let mut sampler = TpeSampler::with_settings(3, 2, 8).unwrap();
        let mut history = Vec::new();
        for index in 0..12 {
            let params = sampler.suggest(&space, &history);
            let value = if index % 2 == 0 { f64::INFINITY } else { params["subsample"] };
            history.push(Trial { params, value });
        }
        let next = sampler.suggest(&space, &history);
        assert!(space.iter().all(|spec| spec.contains(next[spec.name])));
    }
}
