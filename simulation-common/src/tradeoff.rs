//! Trade-off shapes between pairs of group traits.
//!
//! A trade-off maps the primary trait (growth rate, uptake rate) to the largest
//! admissible value of the secondary trait (resistance, affinity). Shapes are
//! strategy objects: the engine only ever sees a [`TradeOffRule`], so new shapes
//! can be plugged in without touching the phase code. Rules are checked once,
//! when group parameters are resolved.

use serde::{Deserialize, Serialize};
use std::fmt;

pub trait TradeOff: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Largest admissible secondary trait for the given primary trait.
    /// `f64::INFINITY` means no constraint.
    fn frontier(&self, primary: f64) -> f64;
}

/// No constraint between the two traits.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconstrained;

impl TradeOff for Unconstrained {
    fn name(&self) -> &'static str {
        "unconstrained"
    }

    fn frontier(&self, _primary: f64) -> f64 {
        f64::INFINITY
    }
}

/// `secondary = intercept - slope * primary`.
#[derive(Debug, Clone, Copy)]
pub struct Linear {
    pub intercept: f64,
    pub slope: f64,
}

impl TradeOff for Linear {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn frontier(&self, primary: f64) -> f64 {
        self.intercept - self.slope * primary
    }
}

/// `primary * secondary = product`.
#[derive(Debug, Clone, Copy)]
pub struct ConstantProduct {
    pub product: f64,
}

impl TradeOff for ConstantProduct {
    fn name(&self) -> &'static str {
        "constant_product"
    }

    fn frontier(&self, primary: f64) -> f64 {
        if primary > 0.0 {
            self.product / primary
        } else {
            f64::INFINITY
        }
    }
}

/// How strictly a group must sit on the trade-off curve.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintMode {
    /// The secondary trait must equal the frontier value (within tolerance).
    Exact,
    /// The secondary trait may not exceed the frontier (Pareto constraint).
    #[default]
    Frontier,
}

/// A trade-off shape together with how it is enforced.
#[derive(Debug)]
pub struct TradeOffRule {
    pub shape: Box<dyn TradeOff>,
    pub mode: ConstraintMode,
    pub tolerance: f64,
}

impl TradeOffRule {
    pub fn new(shape: Box<dyn TradeOff>, mode: ConstraintMode, tolerance: f64) -> Self {
        Self { shape, mode, tolerance }
    }

    pub fn unconstrained() -> Self {
        Self::new(Box::new(Unconstrained), ConstraintMode::Frontier, 0.0)
    }

    /// Checks a `(primary, secondary)` pair. The error string describes the violation.
    pub fn check(&self, primary: f64, secondary: f64) -> Result<(), String> {
        let limit = self.shape.frontier(primary);
        if !limit.is_finite() {
            return Ok(());
        }
        let ok = match self.mode {
            ConstraintMode::Exact => (secondary - limit).abs() <= self.tolerance,
            ConstraintMode::Frontier => secondary <= limit + self.tolerance,
        };
        if ok {
            Ok(())
        } else {
            Err(format!(
                "{} trade-off ({:?}) violated: value {} against frontier {} at {}",
                self.shape.name(),
                self.mode,
                secondary,
                limit,
                primary
            ))
        }
    }

    /// Secondary trait on the frontier, clamped to `[lo, hi]`; `lo` when unconstrained.
    pub fn frontier_value(&self, primary: f64, lo: f64, hi: f64) -> f64 {
        let v = self.shape.frontier(primary);
        if v.is_finite() {
            v.max(lo).min(hi)
        } else {
            lo
        }
    }
}

/// Serialized form of a trade-off shape.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TradeOffShape {
    #[default]
    Unconstrained,
    Linear { intercept: f64, slope: f64 },
    ConstantProduct { product: f64 },
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct TradeOffConfig {
    #[serde(flatten)]
    pub shape: TradeOffShape,
    #[serde(default)]
    pub mode: ConstraintMode,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_tolerance() -> f64 {
    1e-9
}

impl Default for TradeOffConfig {
    fn default() -> Self {
        Self {
            shape: TradeOffShape::Unconstrained,
            mode: ConstraintMode::Frontier,
            tolerance: default_tolerance(),
        }
    }
}

impl TradeOffConfig {
    pub fn build(&self) -> TradeOffRule {
        let shape: Box<dyn TradeOff> = match self.shape {
            TradeOffShape::Unconstrained => Box::new(Unconstrained),
            TradeOffShape::Linear { intercept, slope } => Box::new(Linear { intercept, slope }),
            TradeOffShape::ConstantProduct { product } => Box::new(ConstantProduct { product }),
        };
        TradeOffRule::new(shape, self.mode, self.tolerance)
    }
}
