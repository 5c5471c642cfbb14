//! Decimal math helpers (no f64, no MathematicalOps).
//!
//! The normal density and distribution are local approximations so the
//! pricer carries no scientific-computing dependency.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Below this the exponential is zero at 28 decimal places.
const EXP_UNDERFLOW: Decimal = dec!(-700);

/// Past this |x| the normal tails vanish at Decimal precision.
const NORMAL_SATURATION: Decimal = dec!(40);

const NEWTON_EPS: Decimal = dec!(0.0000000000000000000001);

/// Taylor series exp(x) with range reduction for |x| > 2.
/// exp(x) = exp(x/2)^2 when |x| > 2, then Taylor with 30 terms.
pub fn exp_decimal(x: Decimal) -> Decimal {
    if x < EXP_UNDERFLOW {
        return Decimal::ZERO;
    }
    let two = dec!(2);

    if x > two || x < -two {
        let half = exp_decimal(x / two);
        return half * half;
    }

    let mut sum = Decimal::ONE;
    let mut term = Decimal::ONE;
    for n in 1u32..=30 {
        term = term * x / Decimal::from(n);
        if term.is_zero() {
            break;
        }
        sum += term;
    }
    sum
}

/// Newton's method sqrt: y_{n+1} = (y_n + x/y_n) / 2, stops once stable.
pub fn sqrt_decimal(x: Decimal) -> Decimal {
    if x <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    if x == Decimal::ONE {
        return Decimal::ONE;
    }
    let two = dec!(2);
    let mut guess = if x > dec!(100) {
        dec!(10)
    } else if x < dec!(0.01) {
        dec!(0.1)
    } else {
        x / two
    };
    for _ in 0..100 {
        let next = (guess + x / guess) / two;
        if (next - guess).abs() < NEWTON_EPS {
            return next;
        }
        guess = next;
    }
    guess
}

/// Natural log via Newton's method: find y such that exp(y) = x.
pub fn ln_decimal(x: Decimal) -> Decimal {
    if x <= Decimal::ZERO {
        // ln of non-positive is undefined; return a large negative as sentinel
        return dec!(-999);
    }
    if x == Decimal::ONE {
        return Decimal::ZERO;
    }

    // Initial guess: for x near 1, use (x-1); otherwise count powers of e
    let mut y = if x > dec!(0.5) && x < dec!(2) {
        x - Decimal::ONE
    } else {
        let mut approx = Decimal::ZERO;
        let mut v = x;
        let e_approx = dec!(2.718281828459045);
        if x > Decimal::ONE {
            while v > e_approx {
                v /= e_approx;
                approx += Decimal::ONE;
            }
        } else {
            while v < Decimal::ONE / e_approx {
                v *= e_approx;
                approx -= Decimal::ONE;
            }
        }
        approx + (v - Decimal::ONE)
    };

    // y_{n+1} = y_n - 1 + x / exp(y_n)
    for _ in 0..60 {
        let ey = exp_decimal(y);
        if ey.is_zero() {
            break;
        }
        let next = y - Decimal::ONE + x / ey;
        if (next - y).abs() < NEWTON_EPS {
            return next;
        }
        y = next;
    }
    y
}

/// Standard normal PDF: phi(x) = exp(-x^2/2) / sqrt(2*pi)
pub fn norm_pdf(x: Decimal) -> Decimal {
    if x.abs() > NORMAL_SATURATION {
        return Decimal::ZERO;
    }
    let inv_sqrt_two_pi = dec!(0.3989422804014326779399460599);
    exp_decimal(-(x * x) / dec!(2)) * inv_sqrt_two_pi
}

/// Standard normal CDF using Abramowitz & Stegun 26.2.17.
/// Phi(x) = 1 - phi(x) * (b1*t + b2*t^2 + b3*t^3 + b4*t^4 + b5*t^5)
/// where t = 1 / (1 + 0.2316419 * |x|). For x < 0: Phi(x) = 1 - Phi(-x).
pub fn norm_cdf(x: Decimal) -> Decimal {
    if x > NORMAL_SATURATION {
        return Decimal::ONE;
    }
    if x < -NORMAL_SATURATION {
        return Decimal::ZERO;
    }

    let b1 = dec!(0.319381530);
    let b2 = dec!(-0.356563782);
    let b3 = dec!(1.781477937);
    let b4 = dec!(-1.821255978);
    let b5 = dec!(1.330274429);
    let p = dec!(0.2316419);

    let abs_x = x.abs();
    let t = Decimal::ONE / (Decimal::ONE + p * abs_x);

    // Horner form
    let poly = t * (b1 + t * (b2 + t * (b3 + t * (b4 + t * b5))));

    let cdf_pos = Decimal::ONE - norm_pdf(abs_x) * poly;

    if x < Decimal::ZERO {
        Decimal::ONE - cdf_pos
    } else {
        cdf_pos
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: Decimal, b: Decimal, tol: Decimal) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn test_exp_decimal_basic() {
        assert!(approx_eq(exp_decimal(dec!(0)), dec!(1), dec!(0.0000001)));
        assert!(approx_eq(
            exp_decimal(dec!(1)),
            dec!(2.718281828459045),
            dec!(0.000000001)
        ));
        assert!(approx_eq(
            exp_decimal(dec!(-0.05)),
            dec!(0.951229424500714),
            dec!(0.000000001)
        ));
    }

    #[test]
    fn test_exp_decimal_underflow_is_zero() {
        assert_eq!(exp_decimal(dec!(-5000)), Decimal::ZERO);
        assert!(exp_decimal(dec!(-300)) >= Decimal::ZERO);
    }

    #[test]
    fn test_sqrt_decimal_basic() {
        assert!(approx_eq(sqrt_decimal(dec!(4)), dec!(2), dec!(0.0000001)));
        assert!(approx_eq(sqrt_decimal(dec!(0.25)), dec!(0.5), dec!(0.0000001)));
        assert!(approx_eq(
            sqrt_decimal(dec!(0.000000000001)),
            dec!(0.000001),
            dec!(0.0000000001)
        ));
        assert_eq!(sqrt_decimal(dec!(-1)), Decimal::ZERO);
    }

    #[test]
    fn test_ln_decimal_basic() {
        assert!(approx_eq(ln_decimal(dec!(1)), dec!(0), dec!(0.0000001)));
        assert!(approx_eq(
            ln_decimal(dec!(2.718281828459045)),
            dec!(1),
            dec!(0.0000001)
        ));
        assert!(approx_eq(
            ln_decimal(dec!(0.1)),
            dec!(-2.302585092994046),
            dec!(0.0000001)
        ));
        assert!(approx_eq(
            ln_decimal(dec!(1000)),
            dec!(6.907755278982137),
            dec!(0.0000001)
        ));
    }

    #[test]
    fn test_norm_cdf_basic() {
        assert!(approx_eq(norm_cdf(dec!(0)), dec!(0.5), dec!(0.0000001)));
        assert!(approx_eq(norm_cdf(dec!(1.96)), dec!(0.9750021), dec!(0.0000002)));
        assert!(approx_eq(norm_cdf(dec!(-1.96)), dec!(0.0249979), dec!(0.0000002)));
        assert_eq!(norm_cdf(dec!(41)), Decimal::ONE);
        assert_eq!(norm_cdf(dec!(-41)), Decimal::ZERO);
    }

    #[test]
    fn test_norm_cdf_symmetry() {
        for x in [dec!(0.1), dec!(0.7), dec!(1.5), dec!(3.2)] {
            let sum = norm_cdf(x) + norm_cdf(-x);
            assert!(approx_eq(sum, Decimal::ONE, dec!(0.0000000001)));
        }
    }

    #[test]
    fn test_norm_pdf_peak_and_tails() {
        assert!(approx_eq(norm_pdf(dec!(0)), dec!(0.398942280), dec!(0.000000001)));
        assert!(approx_eq(norm_pdf(dec!(1)), dec!(0.241970725), dec!(0.000000001)));
        assert_eq!(norm_pdf(dec!(1000000)), Decimal::ZERO);
    }
}
