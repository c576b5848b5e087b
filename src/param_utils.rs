use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Hyperparameters of one tree family, keyed by name.
pub type ParamSet = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParamScale {
    Linear,
    Log,
    Integer,
}

/// One dimension of a search space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub low: f64,
    pub high: f64,
    pub scale: ParamScale,
}

impl ParamSpec {
    pub const fn linear(name: &'static str, low: f64, high: f64) -> Self {
        Self {
            name,
            low,
            high,
            scale: ParamScale::Linear,
        }
    }

    pub const fn log(name: &'static str, low: f64, high: f64) -> Self {
        Self {
            name,
            low,
            high,
            scale: ParamScale::Log,
        }
    }

    pub const fn integer(name: &'static str, low: f64, high: f64) -> Self {
        Self {
            name,
            low,
            high,
            scale: ParamScale::Integer,
        }
    }

    /// Bounds in the space the sampler works in.
    pub fn internal_bounds(&self) -> (f64, f64) {
        match self.scale {
            ParamScale::Linear => (self.low, self.high),
            ParamScale::Log => (self.low.ln(), self.high.ln()),
            ParamScale::Integer => (self.low - 0.5, self.high + 0.5),
        }
    }

    pub fn to_internal(&self, value: f64) -> f64 {
        match self.scale {
            ParamScale::Log => value.max(self.low).ln(),
            ParamScale::Linear | ParamScale::Integer => value,
        }
    }

    /// Maps a sampler value back to a legal parameter value.
    pub fn from_internal(&self, internal: f64) -> f64 {
        let value = match self.scale {
            ParamScale::Linear => internal,
            ParamScale::Log => internal.exp(),
            ParamScale::Integer => internal.round(),
        };
        clamp_f64(value, self.low, self.low, self.high)
    }

    pub fn contains(&self, value: f64) -> bool {
        value.is_finite()
            && value >= self.low
            && value <= self.high
            && (self.scale != ParamScale::Integer || value.fract() == 0.0)
    }
}

/// Extract a parameter as f64, clamped to a range with finite checks
pub fn get_param_f64_clamped(params: &ParamSet, key: &str, default: f64, min: f64, max: f64) -> f64 {
    let raw = params.get(key).copied().unwrap_or(default);
    clamp_f64(raw, default, min, max)
}

/// Extract a parameter as usize, rounded and clamped to a range with finite checks
pub fn get_param_usize_rounded_clamped(
    params: &ParamSet,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> usize {
    let raw = params.get(key).copied().unwrap_or(default as f64);
    if !raw.is_finite() {
        return default;
    }
    raw.round().clamp(min as f64, max as f64) as usize
}

/// Clamp a raw parameter value to bounds with a finite check
pub fn clamp_f64(value: f64, default: f64, min: f64, max: f64) -> f64 {
    if !value.is_finite() {
        return default;
    }
    value.clamp(min, max)
}

/// Clamp parameter values to their search-space bounds
pub fn clamp_to_space(params: &mut ParamSet, space: &[ParamSpec]) {
    for spec in space {
        if let Some(value) = params.get_mut(spec.name) {
            *value = spec.from_internal(spec.to_internal(*value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_spec_rounds_and_clamps() {
        let spec = ParamSpec::integer("max_depth", 3.0, 10.0);
        assert_eq!(spec.internal_bounds(), (2.5, 10.5));
        assert_eq!(spec.from_internal(10.49), 10.0);
        assert_eq!(spec.from_internal(2.6), 3.0);
        assert!(spec.contains(4.0));
        assert!(!spec.contains(4.5));
    }

    #[test]
    fn log_spec_round_trips() {
        let spec = ParamSpec::log("learning_rate", 0.01, 0.3);
        let value = spec.from_internal(spec.to_internal(0.05));
        assert!((value - 0.05).abs() < 1e-12);
        assert_eq!(spec.from_internal(10.0), 0.3);
    }

    #[test]
    fn getters_fall_back_on_missing_or_bad_values() {
        let mut params = ParamSet::new();
        params.insert("depth".to_string(), f64::NAN);
        params.insert("rate".to_string(), 5.0);
        assert_eq!(get_param_usize_rounded_clamped(&params, "depth", 6, 1, 10), 6);
        assert_eq!(get_param_usize_rounded_clamped(&params, "missing", 6, 1, 10), 6);
        assert_eq!(get_param_f64_clamped(&params, "rate", 0.1, 0.0, 1.0), 1.0);
    }

    #[test]
    fn clamp_to_space_fixes_out_of_range_values() {
        let space = [ParamSpec::integer("num_leaves", 20.0, 150.0)];
        let mut params = ParamSet::new();
        params.insert("num_leaves".to_string(), 300.2);
        clamp_to_space(&mut params, &space);
        assert_eq!(params["num_leaves"], 150.0);
    }
}
