//! Shared conventions for literals, edges, variable kinds, and weights.
//!
//! A literal is a signed nonzero `i32`: the magnitude is a variable id
//! (1-indexed), the sign is the polarity. POG edges use the same encoding
//! with magnitudes above the input variable count addressing POG nodes.
//! Two reserved values denote the constant functions.

use std::fmt;
use std::io;
use std::str::FromStr;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::Zero;

/// Edge/literal value representing the constant true function.
pub const TAUTOLOGY: i32 = i32::MAX;

/// Edge/literal value representing the constant false function.
pub const CONFLICT: i32 = -TAUTOLOGY;

/// Largest usable variable id. Keeps node ids clear of [`TAUTOLOGY`].
pub const MAX_VARIABLE: i32 = 2_000_000_000;

/// Variable id of a literal or edge.
#[inline]
pub fn var_of(lit: i32) -> i32 {
    lit.abs()
}

/// Classification assigned to each input variable by preprocessing.
///
/// Strictly informational after preprocessing: the algorithms consult the
/// data/tseitin variable *sets*, the kind is kept for final reporting.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VarKind {
    /// Never touched by any clause.
    Unused,
    /// Declared data variable (retained by projection).
    Data,
    /// Projection variable that is not Tseitin.
    NonTseitin,
    /// Detected to have the Tseitin property.
    TseitinDetected,
    /// Promoted to Tseitin by blocked-clause addition.
    TseitinPromoted,
    /// Eliminated by BCP or BVE.
    Eliminated,
}

/// Errors reported by parsing, external tools, and weight arithmetic.
///
/// Internal invariant violations (unknown journal entries, missing remap
/// entries, out-of-range literals) are programmer errors and panic instead.
#[derive(Debug)]
pub enum PkcError {
    /// File I/O error.
    Io(io::Error),
    /// Malformed input, reported with its line number.
    Parse { line: usize, msg: String },
    /// External tool failure (missing output file, nonzero exit).
    ExternalTool(String),
    /// Arithmetic failure (reciprocal of zero during weight normalization).
    Arithmetic(String),
}

impl From<io::Error> for PkcError {
    fn from(e: io::Error) -> Self {
        PkcError::Io(e)
    }
}

impl fmt::Display for PkcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkcError::Io(e) => write!(f, "I/O error: {}", e),
            PkcError::Parse { line, msg } => write!(f, "Line #{}: {}", line, msg),
            PkcError::ExternalTool(msg) => write!(f, "External tool error: {}", msg),
            PkcError::Arithmetic(msg) => write!(f, "Arithmetic error: {}", msg),
        }
    }
}

impl std::error::Error for PkcError {}

/// Parses a rational weight in the text forms accepted by weight
/// declarations: integers (`2`), decimals (`0.25`), and fractions (`1/3`).
pub fn parse_weight(text: &str) -> Option<BigRational> {
    let text = text.trim();
    let (negative, text) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    if text.is_empty() {
        return None;
    }
    let magnitude = if let Some((num, den)) = text.split_once('/') {
        let num = BigInt::from_str(num).ok()?;
        let den = BigInt::from_str(den).ok()?;
        if den.is_zero() {
            return None;
        }
        BigRational::new(num, den)
    } else if let Some((whole, frac)) = text.split_once('.') {
        if frac.is_empty() || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let whole = if whole.is_empty() {
            BigInt::zero()
        } else {
            BigInt::from_str(whole).ok()?
        };
        let scale = num_traits::pow(BigInt::from(10), frac.len());
        let frac = BigInt::from_str(frac).ok()?;
        BigRational::new(whole * &scale + frac, scale)
    } else {
        BigRational::from_integer(BigInt::from_str(text).ok()?)
    };
    Some(if negative { -magnitude } else { magnitude })
}
