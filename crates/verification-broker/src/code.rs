//! One-time verification codes.

use crate::{BrokerError, BrokerResult};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use std::fmt;

/// Inclusive range codes are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeRange {
    lo: u32,
    hi: u32,
}

impl CodeRange {
    pub fn new(lo: u32, hi: u32) -> BrokerResult<Self> {
        if lo > hi {
            return Err(BrokerError::InvalidRange { lo, hi });
        }
        Ok(Self { lo, hi })
    }

    pub fn lo(&self) -> u32 {
        self.lo
    }

    pub fn hi(&self) -> u32 {
        self.hi
    }

    /// Number of decimal digits in `hi`. Every code is padded to this width.
    pub fn width(&self) -> usize {
        self.hi.checked_ilog10().map_or(1, |log| log as usize + 1)
    }
}

impl Default for CodeRange {
    fn default() -> Self {
        Self { lo: 0, hi: 9999 }
    }
}

/// A freshly issued code. Never persisted, never reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub value: u32,
    pub width: usize,
    pub issued_at: DateTime<Utc>,
}

impl fmt::Display for VerificationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:0width$}", self.value, width = self.width)
    }
}

/// Draw a code uniformly from `range`.
pub fn next_code(range: &CodeRange) -> VerificationCode {
    VerificationCode {
        value: OsRng.gen_range(range.lo..=range.hi),
        width: range.width(),
        issued_at: Utc::now(),
    }
}
