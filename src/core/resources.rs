//! Resource quantities and requirement bands.
//!
//! A [`Resources`] value maps resource names to non-negative amounts. Absent
//! names count as zero, so zero amounts are never stored. The textual form is
//! `name:value;name:value`, used both for node capacity and task requirements.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::ParseError;

/// Resource that sets a task's progress rate.
pub const CPUS: &str = "cpus";
/// Memory resource.
pub const MEM: &str = "mem";

/// Tolerance for floating point comparisons of amounts.
const EPSILON: f64 = 1e-9;

/// A mapping from resource name to a non-negative amount.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Resources {
    amounts: BTreeMap<String, f64>,
}

impl Resources {
    /// Empty quantity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the `name:value;name:value` form.
    ///
    /// Empty tokens are skipped, so `""` and `"cpus:1;"` are accepted.
    ///
    /// # Errors
    ///
    /// Fails on a token without `:`, an empty name, a non-finite or negative
    /// amount, or a duplicated name.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let mut amounts = BTreeMap::new();
        for token in text.split(';').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, value) = token
                .split_once(':')
                .ok_or_else(|| ParseError::MissingSeparator(token.to_string()))?;
            let name = name.trim();
            if name.is_empty() || name.contains(char::is_whitespace) {
                return Err(ParseError::InvalidName(token.to_string()));
            }
            let value = value.trim();
            let amount: f64 = value.parse().map_err(|_| ParseError::InvalidAmount {
                name: name.to_string(),
                value: value.to_string(),
            })?;
            if !amount.is_finite() {
                return Err(ParseError::InvalidAmount {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            if amount < 0.0 {
                return Err(ParseError::NegativeAmount {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            if amounts.insert(name.to_string(), amount).is_some() {
                return Err(ParseError::Duplicate(name.to_string()));
            }
        }
        amounts.retain(|_, amount| *amount > EPSILON);
        Ok(Self { amounts })
    }

    /// Builder-style setter. Non-positive amounts remove the entry.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, amount: f64) -> Self {
        self.set(name, amount);
        self
    }

    /// Set one component. Non-positive amounts remove the entry.
    pub fn set(&mut self, name: impl Into<String>, amount: f64) {
        let name = name.into();
        if amount > EPSILON {
            self.amounts.insert(name, amount);
        } else {
            self.amounts.remove(&name);
        }
    }

    /// Amount of `name`, zero when absent.
    pub fn get(&self, name: &str) -> f64 {
        self.amounts.get(name).copied().unwrap_or(0.0)
    }

    /// Shorthand for the `cpus` component.
    pub fn cpus(&self) -> f64 {
        self.get(CPUS)
    }

    /// True when every component is zero.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    /// Iterate components in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.amounts.iter().map(|(name, amount)| (name.as_str(), *amount))
    }

    /// Componentwise `self >= need`, treating absent names as zero.
    pub fn fits(&self, need: &Self) -> bool {
        fits(self, need)
    }

    /// Subtract `other`, or `None` if any component would go negative.
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        if !self.fits(other) {
            return None;
        }
        let mut out = self.clone();
        for (name, amount) in other.iter() {
            let left = out.get(name) - amount;
            out.set(name, left);
        }
        Some(out)
    }

    /// Largest ratio `self[name] / total[name]` over the names in `total`.
    pub fn dominant_share(&self, total: &Self) -> f64 {
        total
            .iter()
            .map(|(name, cap)| self.get(name) / cap)
            .fold(0.0, f64::max)
    }

    /// Componentwise approximate equality.
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.amounts
            .keys()
            .chain(other.amounts.keys())
            .all(|name| (self.get(name) - other.get(name)).abs() <= EPSILON * 1e3)
    }
}

/// Componentwise `have >= need`, treating absent names as zero.
pub fn fits(have: &Resources, need: &Resources) -> bool {
    need.iter().all(|(name, amount)| have.get(name) + EPSILON >= amount)
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        for (name, amount) in rhs.iter() {
            let sum = self.get(name) + amount;
            self.set(name, sum);
        }
    }
}

impl Sub<&Resources> for &Resources {
    type Output = Resources;

    fn sub(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}

impl SubAssign<&Resources> for Resources {
    /// Pointwise subtraction. Driving a component below zero is a caller bug;
    /// check with [`fits`] first. Release builds clamp at zero.
    fn sub_assign(&mut self, rhs: &Resources) {
        debug_assert!(
            self.fits(rhs),
            "resource subtraction would go negative: {self} - {rhs}"
        );
        for (name, amount) in rhs.iter() {
            let left = (self.get(name) - amount).max(0.0);
            self.set(name, left);
        }
    }
}

impl fmt::Display for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (name, amount) in self.iter() {
            if !first {
                f.write_str(";")?;
            }
            first = false;
            write!(f, "{name}:{amount}")?;
        }
        Ok(())
    }
}

impl FromStr for Resources {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Acceptable allocation band `[min, max]` for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requirement {
    min: Resources,
    max: Resources,
}

impl Requirement {
    /// Build a band, rejecting `min > max` in any component.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvertedBand`] when `max` does not cover `min`.
    pub fn new(min: Resources, max: Resources) -> Result<Self, ParseError> {
        if !max.fits(&min) {
            return Err(ParseError::InvertedBand {
                min: min.to_string(),
                max: max.to_string(),
            });
        }
        Ok(Self { min, max })
    }

    /// A band with `min == max`.
    pub fn exact(amount: Resources) -> Self {
        Self {
            min: amount.clone(),
            max: amount,
        }
    }

    /// Parse both ends. An empty `min` text means the band is exact at `max`.
    ///
    /// # Errors
    ///
    /// Propagates token errors and rejects inverted bands.
    pub fn parse(min: &str, max: &str) -> Result<Self, ParseError> {
        let max = Resources::parse(max)?;
        if min.trim().is_empty() {
            return Ok(Self::exact(max));
        }
        Self::new(Resources::parse(min)?, max)
    }

    /// Lower end.
    pub fn min(&self) -> &Resources {
        &self.min
    }

    /// Upper end.
    pub fn max(&self) -> &Resources {
        &self.max
    }

    /// True when `amount` lies within `[min, max]` componentwise.
    pub fn accepts(&self, amount: &Resources) -> bool {
        amount.fits(&self.min) && self.max.fits(amount)
    }
}
