//! Capability contract for sampled quantities of interest.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Arithmetic a sample value must support so power sums and moments can be
/// accumulated for it.
///
/// Scalars implement it directly; vector-valued quantities implement it
/// elementwise and reduce to a scalar through [`SampleValue::norm`], which is
/// what bias and variance diagnostics consume.
pub trait SampleValue:
    Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + 'static
{
    /// Sum of two values.
    fn plus(&self, other: &Self) -> Self;

    /// Multiplication by a scalar.
    fn scale(&self, factor: f64) -> Self;

    /// Elementwise product of two values.
    fn times(&self, other: &Self) -> Self;

    /// Elementwise integer power.
    fn power(&self, exponent: i32) -> Self;

    /// Division by a scalar.
    fn divide(&self, divisor: f64) -> Self {
        if divisor == 1.0 {
            return self.clone();
        }
        self.scale(1.0 / divisor)
    }

    /// Difference of two values.
    fn minus(&self, other: &Self) -> Self {
        self.plus(&other.scale(-1.0))
    }

    /// Scalar magnitude used for bias and variance diagnostics. NaN when any
    /// component is undefined.
    fn norm(&self) -> f64;
}

impl SampleValue for f64 {
    fn plus(&self, other: &Self) -> Self {
        self + other
    }

    fn scale(&self, factor: f64) -> Self {
        self * factor
    }

    fn times(&self, other: &Self) -> Self {
        self * other
    }

    fn power(&self, exponent: i32) -> Self {
        self.powi(exponent)
    }

    fn norm(&self) -> f64 {
        self.abs()
    }
}

impl SampleValue for Vec<f64> {
    fn plus(&self, other: &Self) -> Self {
        self.iter().zip(other).map(|(a, b)| a + b).collect()
    }

    fn scale(&self, factor: f64) -> Self {
        self.iter().map(|a| a * factor).collect()
    }

    fn times(&self, other: &Self) -> Self {
        self.iter().zip(other).map(|(a, b)| a * b).collect()
    }

    fn power(&self, exponent: i32) -> Self {
        self.iter().map(|a| a.powi(exponent)).collect()
    }

    /// Maximum absolute component.
    fn norm(&self) -> f64 {
        self.iter().fold(0.0, |acc: f64, value| {
            if acc.is_nan() || value.is_nan() {
                f64::NAN
            } else {
                acc.max(value.abs())
            }
        })
    }
}
