//! Variational Bayes for haplotype mixtures: coordinate ascent over a
//! Dirichlet-categorical model with seeded random restarts, keeping the
//! solution maximizing the evidence lower bound.

use bio::stats::LogProb;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::function::gamma::{digamma, ln_gamma};

#[derive(Debug, Clone)]
pub struct VbConfig {
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Random restarts; the first is always the uniform initialization.
    pub seeds: usize,
    pub seed: u64,
}

impl Default for VbConfig {
    fn default() -> Self {
        VbConfig {
            max_iterations: 100,
            tolerance: 1e-6,
            seeds: 5,
            seed: 0x6f63_746f,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VbSolution {
    pub elbo: f64,
    pub alpha: Vec<f64>,
    /// Posterior mean mixture fractions.
    pub expected_fractions: Vec<f64>,
    /// `responsibilities[read][component]`
    pub responsibilities: Vec<Vec<f64>>,
}

/// Maximize the ELBO of the mixture with prior `Dirichlet(alpha0)` over
/// per-read component likelihoods (`likelihoods[read][component]`, natural
/// log). The likelihood matrix is seed-independent and shared across
/// restarts; only the responsibilities are re-drawn.
pub fn maximize(likelihoods: &[Vec<LogProb>], alpha0: &[f64], config: &VbConfig) -> VbSolution {
    let num_components = alpha0.len();
    debug_assert!(likelihoods.iter().all(|row| row.len() == num_components));
    let mut best: Option<VbSolution> = None;
    for seed_index in 0..config.seeds.max(1) {
        let alpha = initial_alpha(alpha0, seed_index, config, likelihoods.len());
        let solution = ascend(likelihoods, alpha0, alpha, config);
        if best
            .as_ref()
            .map_or(true, |b| solution.elbo > b.elbo)
        {
            best = Some(solution);
        }
    }
    best.expect("at least one seed runs")
}

fn initial_alpha(
    alpha0: &[f64],
    seed_index: usize,
    config: &VbConfig,
    num_reads: usize,
) -> Vec<f64> {
    if seed_index == 0 {
        // uniform: pretend reads split evenly
        return alpha0
            .iter()
            .map(|&a| a + num_reads as f64 / alpha0.len() as f64)
            .collect();
    }
    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(seed_index as u64));
    let uniform = Uniform::new(0.0f64, 1.0);
    let mut weights: Vec<f64> = (0..alpha0.len())
        .map(|_| uniform.sample(&mut rng).max(1e-3))
        .collect();
    let total: f64 = weights.iter().sum();
    for w in &mut weights {
        *w /= total;
    }
    alpha0
        .iter()
        .zip(&weights)
        .map(|(&a, &w)| a + w * num_reads as f64)
        .collect()
}

fn ascend(
    likelihoods: &[Vec<LogProb>],
    alpha0: &[f64],
    mut alpha: Vec<f64>,
    config: &VbConfig,
) -> VbSolution {
    let num_components = alpha0.len();
    let num_reads = likelihoods.len();
    let mut responsibilities = vec![vec![0.0f64; num_components]; num_reads];
    let mut elbo = f64::NEG_INFINITY;
    for _ in 0..config.max_iterations {
        let alpha_sum: f64 = alpha.iter().sum();
        let expected_ln_pi: Vec<f64> = alpha
            .iter()
            .map(|&a| digamma(a) - digamma(alpha_sum))
            .collect();

        // E-step: responsibilities, accumulating the reconstruction term
        let mut ln_norm_total = 0.0;
        for (read, row) in likelihoods.iter().enumerate() {
            let scores: Vec<LogProb> = row
                .iter()
                .zip(&expected_ln_pi)
                .map(|(&lik, &e)| LogProb(*lik + e))
                .collect();
            let norm = LogProb::ln_sum_exp(&scores);
            ln_norm_total += *norm;
            for (k, score) in scores.iter().enumerate() {
                responsibilities[read][k] = (*score - norm).exp();
            }
        }

        // M-step
        for k in 0..num_components {
            alpha[k] = alpha0[k]
                + likelihoods
                    .iter()
                    .enumerate()
                    .map(|(read, _)| responsibilities[read][k])
                    .sum::<f64>();
        }

        let next_elbo = ln_norm_total - kl_dirichlet(&alpha, alpha0);
        if (next_elbo - elbo).abs() < config.tolerance {
            elbo = next_elbo;
            break;
        }
        elbo = next_elbo;
    }
    let alpha_sum: f64 = alpha.iter().sum();
    let expected_fractions = alpha.iter().map(|&a| a / alpha_sum).collect();
    VbSolution {
        elbo,
        alpha,
        expected_fractions,
        responsibilities,
    }
}

fn kl_dirichlet(alpha: &[f64], alpha0: &[f64]) -> f64 {
    let sum: f64 = alpha.iter().sum();
    let sum0: f64 = alpha0.iter().sum();
    let mut result = ln_gamma(sum) - ln_gamma(sum0);
    for (&a, &a0) in alpha.iter().zip(alpha0) {
        result += ln_gamma(a0) - ln_gamma(a);
        result += (a - a0) * (digamma(a) - digamma(sum));
    }
    result
}
