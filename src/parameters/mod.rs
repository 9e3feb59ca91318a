//! Stochastic augmentation parameters.
//!
//! A [`ParameterContext`] owns every random parameter the graph reads. The
//! pipeline calls [`ParameterContext::resample_all`] once per iteration, so all
//! nodes sharing a [`ParamHandle`] see the same value within an iteration and
//! successive iterations draw independent samples.
//!
//! ```rust
//! use augment_pipeline::parameters::{ParamDistribution, ParameterContext};
//!
//! let mut context = ParameterContext::seeded(42);
//! let angle = context.register(ParamDistribution::Uniform { low: -10.0, high: 10.0 }).unwrap();
//! context.resample_all();
//! assert!((-10.0..=10.0).contains(&angle.value()));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use rand::distributions::{Distribution, Uniform, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::errors::{PipelineError, PipelineResult};

/// Distribution a parameter is drawn from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamDistribution {
    /// Always the same value.
    Constant(f32),
    /// Uniform over the closed interval `[low, high]`.
    Uniform { low: f32, high: f32 },
    /// Uniform integer over `[low, high]`, stored as `f32`.
    UniformInt { low: i32, high: i32 },
    /// One of `values`, weighted when `weights` is given.
    Choice {
        values: Vec<f32>,
        weights: Option<Vec<f32>>,
    },
}

#[derive(Debug)]
enum Sampler {
    Constant(f32),
    Uniform(Uniform<f32>),
    UniformInt(Uniform<i32>),
    Pick(Vec<f32>),
    Weighted(Vec<f32>, WeightedIndex<f32>),
}

impl Sampler {
    fn prepare(distribution: &ParamDistribution) -> PipelineResult<Self> {
        match distribution {
            ParamDistribution::Constant(value) => Ok(Sampler::Constant(*value)),
            ParamDistribution::Uniform { low, high } => {
                // the sampler also needs a finite span
                if !(low.is_finite() && high.is_finite()) || low > high || !(high - low).is_finite() {
                    return Err(PipelineError::config_error(format!(
                        "uniform range [{low}, {high}] is invalid"
                    )));
                }
                Ok(Sampler::Uniform(Uniform::new_inclusive(*low, *high)))
            }
            ParamDistribution::UniformInt { low, high } => {
                if low > high {
                    return Err(PipelineError::config_error(format!(
                        "integer range [{low}, {high}] is invalid"
                    )));
                }
                Ok(Sampler::UniformInt(Uniform::new_inclusive(*low, *high)))
            }
            ParamDistribution::Choice { values, weights } => {
                if values.is_empty() {
                    return Err(PipelineError::config_error("choice needs at least one value"));
                }
                match weights {
                    None => Ok(Sampler::Pick(values.clone())),
                    Some(weights) => {
                        if weights.len() != values.len() {
                            return Err(PipelineError::config_error(format!(
                                "choice has {} values but {} weights",
                                values.len(),
                                weights.len()
                            )));
                        }
                        let index = WeightedIndex::new(weights).map_err(|e| {
                            PipelineError::config_error(format!("invalid choice weights: {e}"))
                        })?;
                        Ok(Sampler::Weighted(values.clone(), index))
                    }
                }
            }
        }
    }

    fn sample(&self, rng: &mut StdRng) -> f32 {
        match self {
            Sampler::Constant(value) => *value,
            Sampler::Uniform(uniform) => uniform.sample(rng),
            Sampler::UniformInt(uniform) => uniform.sample(rng) as f32,
            Sampler::Pick(values) => values[rng.gen_range(0..values.len())],
            Sampler::Weighted(values, index) => values[index.sample(rng)],
        }
    }
}

#[derive(Debug)]
struct ParamSlot {
    distribution: ParamDistribution,
    sampler: Sampler,
    bits: AtomicU32,
}

/// Shared read handle to one stochastic parameter.
#[derive(Debug, Clone)]
pub struct ParamHandle(Arc<ParamSlot>);

impl ParamHandle {
    /// Value drawn by the most recent resample.
    pub fn value(&self) -> f32 {
        f32::from_bits(self.0.bits.load(Ordering::Acquire))
    }

    pub fn distribution(&self) -> &ParamDistribution {
        &self.0.distribution
    }

    fn store(&self, value: f32) {
        self.0.bits.store(value.to_bits(), Ordering::Release);
    }
}

/// Owner of every stochastic parameter used by one pipeline.
#[derive(Debug)]
pub struct ParameterContext {
    rng: StdRng,
    parameters: Vec<ParamHandle>,
    generation: u64,
}

impl ParameterContext {
    /// Creates a context seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Creates a reproducible context.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng,
            parameters: Vec::new(),
            generation: 0,
        }
    }

    /// Registers a parameter and draws its first value.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the distribution is malformed.
    pub fn register(&mut self, distribution: ParamDistribution) -> PipelineResult<ParamHandle> {
        let sampler = Sampler::prepare(&distribution)?;
        let initial = sampler.sample(&mut self.rng);
        let handle = ParamHandle(Arc::new(ParamSlot {
            distribution,
            sampler,
            bits: AtomicU32::new(initial.to_bits()),
        }));
        self.parameters.push(handle.clone());
        Ok(handle)
    }

    /// Draws a new value for every registered parameter.
    pub fn resample_all(&mut self) {
        for parameter in &self.parameters {
            let value = parameter.0.sampler.sample(&mut self.rng);
            parameter.store(value);
        }
        self.generation += 1;
    }

    /// Number of completed `resample_all` calls.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}

impl Default for ParameterContext {
    fn default() -> Self {
        Self::new()
    }
}
