//! Integer helpers for the clock calibration ratio.

/// Greatest common divisor; `gcd(0, 0) == 0`.
#[inline]
pub fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

/// Reduced `(k, m)` with `a * k == b * m` (i.e. `lcm / a`, `lcm / b`).
///
/// Both inputs are clamped to at least 1 so the result is always usable as a ratio.
#[inline]
pub fn scale_constants(a: u64, b: u64) -> (u64, u64) {
    let (a, b) = (a.max(1), b.max(1));
    let g = gcd(a, b);
    (b / g, a / g)
}

/// `value * k / m` without intermediate overflow, saturating at `u64::MAX`.
#[inline]
pub fn mul_div(value: u64, k: u64, m: u64) -> u64 {
    let r = u128::from(value) * u128::from(k) / u128::from(m.max(1));
    r.min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_basics() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(7, 0), 7);
        assert_eq!(gcd(0, 0), 0);
    }

    #[test]
    fn scale_constants_balance() {
        let (k, m) = scale_constants(16_000, 2_000);
        assert_eq!((k, m), (1, 8));
        assert_eq!(16_000 * k, 2_000 * m);

        let (k, m) = scale_constants(0, 5);
        assert_eq!(k * 1, m * 5);
    }

    #[test]
    fn mul_div_saturates() {
        assert_eq!(mul_div(10, 3, 2), 15);
        assert_eq!(mul_div(u64::MAX, 4, 1), u64::MAX);
        assert_eq!(mul_div(10, 1, 0), 10);
    }
}
