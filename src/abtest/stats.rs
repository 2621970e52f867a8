//! Significance Testing
//!
//! Chi-square test of independence on the 2×2 success/failure contingency
//! table of an A/B test, with the p-value derived analytically for one
//! degree of freedom: `p = erfc(sqrt(chi2 / 2))`.

/// Chi-square statistic and p-value for a 2×2 table.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquare {
    /// The chi-square statistic
    pub statistic: f64,
    /// Two-sided p-value at one degree of freedom
    pub p_value: f64,
}

/// Chi-square test on the table:
///
/// ```text
///           success   failure
/// variant A    a         b
/// variant B    c         d
/// ```
///
/// Returns `None` when any marginal total is zero, where the statistic is
/// undefined.
pub fn chi_square_2x2(a: u64, b: u64, c: u64, d: u64) -> Option<ChiSquare> {
    let (a, b, c, d) = (a as f64, b as f64, c as f64, d as f64);
    let n = a + b + c + d;
    let row_a = a + b;
    let row_b = c + d;
    let col_success = a + c;
    let col_failure = b + d;

    if row_a == 0.0 || row_b == 0.0 || col_success == 0.0 || col_failure == 0.0 {
        return None;
    }

    let statistic = n * (a * d - b * c).powi(2) / (row_a * row_b * col_success * col_failure);
    let p_value = erfc((statistic / 2.0).sqrt());

    Some(ChiSquare { statistic, p_value })
}

/// Complementary error function, Abramowitz & Stegun 7.1.26.
///
/// Maximum absolute error 1.5e-7, ample for significance reporting.
fn erfc(x: f64) -> f64 {
    const P: f64 = 0.3275911;
    const A1: f64 = 0.254829592;
    const A2: f64 = -0.284496736;
    const A3: f64 = 1.421413741;
    const A4: f64 = -1.453152027;
    const A5: f64 = 1.061405429;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + P * x);
    let poly = t * (A1 + t * (A2 + t * (A3 + t * (A4 + t * A5))));
    let erf = 1.0 - poly * (-x * x).exp();
    if sign < 0.0 {
        1.0 + erf
    } else {
        1.0 - erf
    }
}
