//! PBKDF2 iteration-count policy
//!
//! Every place an iteration count enters the program goes through this
//! module: the `--iterations` flag of both text and file encryption, and the
//! `iters` field of a package being decrypted. Human input gets a default, a
//! floor and a ceiling. Package input only gets the ceiling, so that a
//! hostile package cannot force an unbounded derivation.

use std::fmt;

/// Iteration count used when none (or garbage) is supplied.
pub const DEFAULT_ITERATIONS: u32 = 250_000;

/// Lowest iteration count accepted for encryption.
pub const MIN_ITERATIONS: u32 = 10_000;

/// Highest iteration count we will ever derive with.
pub const MAX_ITERATIONS: u32 = 10_000_000;

/// A non-fatal notice about an iteration count that was adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// A user-supplied count exceeded the ceiling and was lowered to it.
    InputCapped,
    /// A package declared a count above the ceiling. Decryption proceeds with
    /// the ceiling, which fails authentication if the package really was
    /// sealed with more.
    PackageCapped,
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::InputCapped => write!(f, "Iterations capped at 10,000,000."),
            Advisory::PackageCapped => write!(
                f,
                "Iteration count in package was too high, capped at 10,000,000."
            ),
        }
    }
}

/// An iteration count after policy has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clamped {
    pub iterations: u32,
    pub advisory: Option<Advisory>,
}

/// Apply the ceiling to a count, tagging any reduction with `advisory`.
fn cap_with(iters: u64, advisory: Advisory) -> Clamped {
    if iters > u64::from(MAX_ITERATIONS) {
        Clamped {
            iterations: MAX_ITERATIONS,
            advisory: Some(advisory),
        }
    } else {
        // Fits: bounded by MAX_ITERATIONS above.
        Clamped {
            iterations: iters as u32,
            advisory: None,
        }
    }
}

/// Ceiling clamp for a count read from a package.
///
/// Zero is passed through; rejecting it is up to the caller, which knows
/// what kind of error to report.
pub fn cap(iters: u64) -> Clamped {
    cap_with(iters, Advisory::PackageCapped)
}

/// Resolve a user-supplied iteration count.
///
/// Absent, unparsable, or zero input yields [`DEFAULT_ITERATIONS`]. Anything
/// below [`MIN_ITERATIONS`] (negative included) is raised to it, and anything
/// above [`MAX_ITERATIONS`] is lowered with [`Advisory::InputCapped`].
pub fn resolve_input(raw: Option<&str>) -> Clamped {
    let parsed = raw
        .map(str::trim)
        .and_then(|s| s.parse::<i128>().ok())
        .filter(|&n| n != 0);

    let Some(n) = parsed else {
        return Clamped {
            iterations: DEFAULT_ITERATIONS,
            advisory: None,
        };
    };

    if n < i128::from(MIN_ITERATIONS) {
        return Clamped {
            iterations: MIN_ITERATIONS,
            advisory: None,
        };
    }

    let n = u64::try_from(n).unwrap_or(u64::MAX);
    cap_with(n, Advisory::InputCapped)
}

/// True if `iters` lies inside the range encryption accepts.
pub fn in_range(iters: u32) -> bool {
    (MIN_ITERATIONS..=MAX_ITERATIONS).contains(&iters)
}
