//! Unit newtypes for canal quantities.
//!
//! Elevations, depths and lengths are all [`Meters`]; discharges are
//! [`CubicMetersPerSecond`]. Wrapping them keeps a level from being added to
//! a discharge by accident. All types are `#[repr(transparent)]` and serialise
//! as plain numbers.
//!
//! ```
//! use canal_core::units::{CubicMetersPerSecond, Meters, MetersPerSecond};
//!
//! let level = Meters(221.0) - Meters(217.5);
//! assert_eq!(level.value(), 3.5);
//!
//! let t = Meters(2000.0).travel_time(MetersPerSecond(0.5));
//! assert_eq!(t.value(), 4000.0);
//!
//! let q = CubicMetersPerSecond(2.0);
//! // let wrong = q + level; // does not compile
//! # let _ = q;
//! ```

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};

macro_rules! impl_unit_ops {
    ($type:ty, $unit_name:literal) => {
        impl Add for $type {
            type Output = Self;
            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $type {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Neg for $type {
            type Output = Self;
            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }

        impl Mul<f64> for $type {
            type Output = Self;
            fn mul(self, rhs: f64) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<f64> for $type {
            type Output = Self;
            fn div(self, rhs: f64) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Div<$type> for $type {
            type Output = f64;
            fn div(self, rhs: $type) -> Self::Output {
                self.0 / rhs.0
            }
        }

        impl std::fmt::Display for $type {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:.3} {}", self.0, $unit_name)
            }
        }

        impl $type {
            #[inline]
            pub const fn new(value: f64) -> Self {
                Self(value)
            }

            /// Raw numeric value
            #[inline]
            pub const fn value(self) -> f64 {
                self.0
            }

            #[inline]
            pub fn abs(self) -> Self {
                Self(self.0.abs())
            }

            #[inline]
            pub fn is_finite(self) -> bool {
                self.0.is_finite()
            }

            #[inline]
            pub fn min(self, other: Self) -> Self {
                Self(self.0.min(other.0))
            }

            #[inline]
            pub fn max(self, other: Self) -> Self {
                Self(self.0.max(other.0))
            }

            #[inline]
            pub fn clamp(self, min: Self, max: Self) -> Self {
                Self(self.0.clamp(min.0, max.0))
            }

            pub const ZERO: Self = Self(0.0);
        }

        impl std::iter::Sum for $type {
            fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }

        impl<'a> std::iter::Sum<&'a $type> for $type {
            fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
                Self(iter.map(|x| x.0).sum())
            }
        }
    };
}

/// Length, depth or elevation in meters (elevations are m above mean sea level)
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Meters(pub f64);

impl_unit_ops!(Meters, "m");

/// Volumetric discharge in m³/s
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct CubicMetersPerSecond(pub f64);

impl_unit_ops!(CubicMetersPerSecond, "m³/s");

/// Mean flow velocity in m/s
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct MetersPerSecond(pub f64);

impl_unit_ops!(MetersPerSecond, "m/s");

/// Duration in seconds
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Seconds(pub f64);

impl_unit_ops!(Seconds, "s");

/// Electrical power in kilowatts
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Kilowatts(pub f64);

impl_unit_ops!(Kilowatts, "kW");

impl Meters {
    /// Time to cover this distance at a given velocity. Zero or negative
    /// velocity yields an infinite duration.
    #[inline]
    pub fn travel_time(self, velocity: MetersPerSecond) -> Seconds {
        if velocity.0 <= 0.0 {
            Seconds(f64::INFINITY)
        } else {
            Seconds(self.0 / velocity.0)
        }
    }
}

impl CubicMetersPerSecond {
    /// Time needed to deliver a volume (m³). Zero flow never finishes.
    #[inline]
    pub fn time_to_deliver(self, volume_m3: f64) -> Seconds {
        if self.0 <= 0.0 {
            Seconds(f64::INFINITY)
        } else {
            Seconds(volume_m3 / self.0)
        }
    }
}

impl Seconds {
    #[inline]
    pub fn hours(self) -> f64 {
        self.0 / 3600.0
    }

    #[inline]
    pub fn from_hours(hours: f64) -> Self {
        Self(hours * 3600.0)
    }
}

impl Kilowatts {
    /// Energy in MWh produced over a number of hours
    #[inline]
    pub fn energy_mwh(self, hours: f64) -> f64 {
        self.0 * hours / 1000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meters_arithmetic() {
        let a = Meters(221.0);
        let b = Meters(217.5);

        assert_eq!((a - b).value(), 3.5);
        assert_eq!((a + b).value(), 438.5);
        assert_eq!((-b).value(), -217.5);
        assert_eq!((b * 2.0).value(), 435.0);
        assert_eq!((Meters(10.0) / 4.0).value(), 2.5);
        assert_eq!(Meters(10.0) / Meters(4.0), 2.5);
    }

    #[test]
    fn test_travel_time() {
        assert_eq!(Meters(1200.0).travel_time(MetersPerSecond(0.6)).value(), 2000.0);
        assert!(!Meters(10.0).travel_time(MetersPerSecond(0.0)).is_finite());
    }

    #[test]
    fn test_delivery_time() {
        let q = CubicMetersPerSecond(2.5);
        assert_eq!(q.time_to_deliver(9000.0).value(), 3600.0);
        assert!(!CubicMetersPerSecond(0.0).time_to_deliver(1.0).is_finite());
    }

    #[test]
    fn test_hours_and_energy() {
        assert_eq!(Seconds(7200.0).hours(), 2.0);
        assert_eq!(Seconds::from_hours(1.5).value(), 5400.0);
        assert_eq!(Kilowatts(500.0).energy_mwh(10.0), 5.0);
    }

    #[test]
    fn test_sum_and_clamp() {
        let flows = vec![
            CubicMetersPerSecond(1.0),
            CubicMetersPerSecond(2.0),
            CubicMetersPerSecond(3.5),
        ];
        let total: CubicMetersPerSecond = flows.iter().sum();
        assert_eq!(total.value(), 6.5);
        assert_eq!(
            Meters(3.0).clamp(Meters(0.0), Meters(1.5)).value(),
            1.5
        );
    }

    #[test]
    fn test_display_and_json() {
        assert_eq!(format!("{}", Meters(2.5)), "2.500 m");
        assert_eq!(format!("{}", CubicMetersPerSecond(1.0)), "1.000 m³/s");
        assert_eq!(serde_json::to_string(&Meters(3.25)).unwrap(), "3.25");
        let q: CubicMetersPerSecond = serde_json::from_str("4.5").unwrap();
        assert_eq!(q.value(), 4.5);
    }
}
