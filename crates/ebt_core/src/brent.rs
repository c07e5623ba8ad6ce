//! Brent's method on a bracketing interval.

use crate::error::RootError;
use crate::traits::Scalar;

/// Iteration budget of the root finder.
pub const MAX_ITERATIONS: usize = 500;

/// Find a zero of `f` in `[a, b]` given `f(a) = fa` and `f(b) = fb`.
///
/// Convergence is declared when the bracket half-width drops below
/// `2 * eps * |b| + 0.5 * tolerance`.
pub fn find_root<T, F>(mut f: F, a: T, fa: T, b: T, fb: T, tolerance: T) -> Result<T, RootError>
where
    T: Scalar,
    F: FnMut(T) -> T,
{
    let zero = T::zero();
    let one = T::one();
    let two = one + one;
    let three = two + one;
    let half = one / two;
    let eps = T::from_f64(1.0e-16).unwrap_or_else(T::epsilon);

    let (mut a, mut fa, mut b, mut fb) = (a, fa, b, fb);
    if fa * fb > zero {
        return Err(RootError::NotBracketed);
    }

    let mut c = zero;
    let mut fc = fb;
    let mut d = zero;
    let mut e = zero;

    for _ in 0..MAX_ITERATIONS {
        if fb * fc > zero {
            c = a;
            fc = fa;
            d = b - a;
            e = d;
        }
        if fc.abs() < fb.abs() {
            a = b;
            fa = fb;
            b = c;
            fb = fc;
            c = a;
            fc = fa;
        }
        let tol1 = two * eps * b.abs() + half * tolerance;
        let xm = half * (c - b);

        if (xm.abs() <= tol1 && fb * fc <= zero) || fb == zero {
            return Ok(b);
        }

        if e.abs() >= tol1 && fa.abs() > fb.abs() {
            // Attempt inverse quadratic interpolation, or secant when only two points differ.
            let s = fb / fa;
            let mut p;
            let mut q;
            if a == c {
                p = two * xm * s;
                q = one - s;
            } else {
                let qq = fa / fc;
                let r = fb / fc;
                p = s * (two * xm * qq * (qq - r) - (b - a) * (r - one));
                q = (qq - one) * (r - one) * (s - one);
            }
            if p > zero {
                q = -q;
            }
            p = p.abs();
            let min1 = three * xm * q - (tol1 * q).abs();
            let min2 = (e * q).abs();
            if two * p < min1.min(min2) {
                e = d;
                d = p / q;
            } else {
                d = xm;
                e = d;
            }
        } else {
            d = xm;
            e = d;
        }
        a = b;
        fa = fb;
        if d.abs() > tol1 {
            b = b + d;
        } else if xm > zero {
            b = b + tol1.abs();
        } else {
            b = b - tol1.abs();
        }
        fb = f(b);
    }

    Err(RootError::IterationLimit)
}
