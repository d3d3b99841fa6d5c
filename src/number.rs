//! RFD numbers, the branch names derived from them, and next-number allocation.

use crate::constants::{BRANCH_PREFIX, NUMBER_WIDTH};
use serde::{Deserialize, Serialize};
use std::{fmt, num::NonZeroU32, str::FromStr};
use thiserror::Error;

/// Errors produced when constructing an [RfdNumber].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NumberError {
    /// RFD numbers start at 1.
    #[error("RFD numbers must be greater than zero")]
    Zero,
    /// The input is not a base-10 integer.
    #[error("`{0}` is not a valid RFD number")]
    Invalid(String),
}

/// A positive, sequential RFD number.
///
/// The canonical textual form is zero-padded to four digits, e.g. `7` renders as `0007`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct RfdNumber(NonZeroU32);

impl RfdNumber {
    /// Creates a new [RfdNumber], or [None] if `n` is zero.
    pub fn new(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Self)
    }

    /// Returns the number as a plain integer.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// Returns the zero-padded form of the number.
    pub fn formatted(self) -> String {
        format!("{:0width$}", self.get(), width = NUMBER_WIDTH)
    }

    /// Returns the name of the branch that holds this RFD.
    pub fn branch_name(self) -> String {
        format!("{}{}", BRANCH_PREFIX, self.formatted())
    }

    /// Decodes a branch name produced by [RfdNumber::branch_name].
    ///
    /// Only the canonical form is accepted, which keeps the mapping bijective: `rfd-0007`
    /// decodes to 7, while `rfd-7` and `rfd-00007` do not decode at all.
    pub fn from_branch_name(branch: &str) -> Option<Self> {
        let digits = branch.strip_prefix(BRANCH_PREFIX)?;
        if digits.len() < NUMBER_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        if digits.len() > NUMBER_WIDTH && digits.starts_with('0') {
            return None;
        }
        digits.parse().ok().and_then(Self::new)
    }

    /// Adds `offset` to the number, returning [None] on overflow.
    pub fn checked_add(self, offset: u32) -> Option<Self> {
        self.0.checked_add(offset).map(Self)
    }
}

impl fmt::Display for RfdNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.formatted())
    }
}

impl TryFrom<u32> for RfdNumber {
    type Error = NumberError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        Self::new(n).ok_or(NumberError::Zero)
    }
}

impl From<RfdNumber> for u32 {
    fn from(n: RfdNumber) -> Self {
        n.get()
    }
}

impl FromStr for RfdNumber {
    type Err = NumberError;

    /// Accepts a plain number (`42`, `0042`) or a canonical branch name (`rfd-0042`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(n) = Self::from_branch_name(s.trim()) {
            return Ok(n);
        }
        let n = s
            .trim()
            .parse::<u32>()
            .map_err(|_| NumberError::Invalid(s.to_string()))?;
        Self::try_from(n)
    }
}

/// Computes the candidate for the next RFD number from the numbers already in use.
///
/// The policy is largest-plus-one, so a number is never handed out twice even if an RFD in
/// the middle of the range was withdrawn. Zero entries are malformed and ignored.
///
/// ## Returns
/// - `Some(RfdNumber)` - The candidate number.
/// - `None` - No valid number is in use, or the successor would overflow.
pub fn allocate_next(used: &[u32]) -> Option<RfdNumber> {
    used.iter()
        .copied()
        .filter_map(RfdNumber::new)
        .max()
        .and_then(|max| max.checked_add(1))
}
