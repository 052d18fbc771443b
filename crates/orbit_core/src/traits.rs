use num_complex::Complex;
use num_traits::{Float, FromPrimitive};
use std::convert::Infallible;
use std::fmt::Debug;
use std::ops::Sub;

/// A trait for real types that can measure distances and tolerances.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A state of an iterated map.
/// Points are plain values: every application of the map yields a new one.
pub trait Point: Copy + Debug + Sub<Output = Self> {
    /// The real type the magnitude is measured in.
    type Magnitude: Scalar;

    /// Absolute value (modulus for complex points).
    fn magnitude(&self) -> Self::Magnitude;

    /// |self - other|
    fn distance(&self, other: &Self) -> Self::Magnitude {
        (*self - *other).magnitude()
    }
}

impl<T: Scalar> Point for Complex<T> {
    type Magnitude = T;

    fn magnitude(&self) -> T {
        self.norm()
    }
}

macro_rules! real_point {
    ($($t:ty),*) => {
        $(
            impl Point for $t {
                type Magnitude = $t;

                fn magnitude(&self) -> $t {
                    self.abs()
                }
            }
        )*
    };
}

real_point!(f32, f64);

/// A map F that generates an orbit a0, F(a0), F(F(a0)), ...
///
/// The map is treated as an opaque black box. It may fail for inputs
/// outside its domain; such failures are returned as `Self::Error`.
pub trait IteratedMap<P> {
    type Error;

    /// Evaluates F at `point`.
    fn apply(&self, point: P) -> Result<P, Self::Error>;
}

impl<P, E, F> IteratedMap<P> for F
where
    F: Fn(P) -> Result<P, E>,
{
    type Error = E;

    fn apply(&self, point: P) -> Result<P, E> {
        self(point)
    }
}

/// Adapter for maps that cannot fail, e.g. `PureMap(|z| z * z - 1.0)`.
#[derive(Debug, Clone, Copy)]
pub struct PureMap<F>(pub F);

impl<P, F> IteratedMap<P> for PureMap<F>
where
    F: Fn(P) -> P,
{
    type Error = Infallible;

    fn apply(&self, point: P) -> Result<P, Infallible> {
        Ok((self.0)(point))
    }
}

#[cfg(test)]
mod tests {
    use super::{IteratedMap, Point, PureMap};
    use num_complex::Complex64;

    #[test]
    fn complex_distance_is_modulus_of_difference() {
        let a = Complex64::new(1.0, 1.0);
        let b = Complex64::new(4.0, 5.0);
        assert!((a.distance(&b) - 5.0).abs() < 1e-12);
        assert!((b.magnitude() - 41.0_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn real_distance_is_absolute_difference() {
        assert_eq!(2.5_f64.distance(&-1.0), 3.5);
        assert_eq!((-0.25_f32).magnitude(), 0.25);
    }

    #[test]
    fn closures_and_pure_maps_are_iterated_maps() {
        let halve = |x: f64| -> Result<f64, String> { Ok(x / 2.0) };
        assert_eq!(halve.apply(3.0), Ok(1.5));

        let reject = |_: f64| -> Result<f64, String> { Err("outside domain".to_string()) };
        assert_eq!(reject.apply(1.0), Err("outside domain".to_string()));

        let square = PureMap(|z: Complex64| z * z);
        assert_eq!(square.apply(Complex64::i()), Ok(Complex64::new(-1.0, 0.0)));
    }
}
