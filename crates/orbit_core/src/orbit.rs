use crate::traits::{IteratedMap, Point, Scalar};

/// Discrete orbit stepper.
/// Holds the current point a_n and evaluates a_{n+1} = F(a_n) on demand.
pub struct Orbit<'a, M, P> {
    map: &'a M,
    current: P,
    steps: usize,
    failed: bool,
}

impl<'a, M, P> Orbit<'a, M, P>
where
    M: IteratedMap<P>,
    P: Point,
{
    pub fn new(map: &'a M, start: P) -> Self {
        Self {
            map,
            current: start,
            steps: 0,
            failed: false,
        }
    }

    pub fn current(&self) -> P {
        self.current
    }

    /// Number of map applications performed so far.
    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Applies F once and returns the new point.
    pub fn advance(&mut self) -> Result<P, M::Error> {
        self.current = self.map.apply(self.current)?;
        self.steps += 1;
        Ok(self.current)
    }

    /// Applies F `n` times.
    pub fn advance_by(&mut self, n: usize) -> Result<P, M::Error> {
        for _ in 0..n {
            self.advance()?;
        }
        Ok(self.current)
    }
}

/// Yields F(a0), F(F(a0)), ... and stops after the first failure.
impl<'a, M, P> Iterator for Orbit<'a, M, P>
where
    M: IteratedMap<P>,
    P: Point,
{
    type Item = Result<P, M::Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let next = self.advance();
        self.failed = next.is_err();
        Some(next)
    }
}

impl<'a, M, P> std::iter::FusedIterator for Orbit<'a, M, P>
where
    M: IteratedMap<P>,
    P: Point,
{
}

/// F^n(point)
pub fn iterate<M, P>(map: &M, point: P, n: usize) -> Result<P, M::Error>
where
    M: IteratedMap<P>,
    P: Point,
{
    Orbit::new(map, point).advance_by(n)
}

/// |F^period(point) - point|, zero for an exactly periodic point.
pub fn periodicity_residual<M, P>(
    map: &M,
    point: P,
    period: usize,
) -> Result<P::Magnitude, M::Error>
where
    M: IteratedMap<P>,
    P: Point,
{
    let image = iterate(map, point, period)?;
    Ok(image.distance(&point))
}

pub fn within_tolerance<T: Scalar>(distance: T, tolerance: T) -> bool {
    distance <= tolerance
}

/// Quotient of two successive closeness measurements.
/// A zero denominator only arises for exact repeats and counts as perfect contraction.
pub fn contraction_ratio<T: Scalar>(current: T, previous: T) -> T {
    if previous.is_zero() {
        T::zero()
    } else {
        current / previous
    }
}

#[cfg(test)]
mod tests {
    use super::{contraction_ratio, iterate, periodicity_residual, within_tolerance, Orbit};
    use crate::traits::PureMap;
    use num_complex::Complex64;

    #[test]
    fn orbit_tracks_steps_and_current_point() {
        let double = PureMap(|x: f64| 2.0 * x);
        let mut orbit = Orbit::new(&double, 1.0);
        assert_eq!(orbit.steps(), 0);
        assert_eq!(orbit.advance(), Ok(2.0));
        assert_eq!(orbit.advance_by(3), Ok(16.0));
        assert_eq!(orbit.current(), 16.0);
        assert_eq!(orbit.steps(), 4);
    }

    #[test]
    fn orbit_iterator_stops_after_failure() {
        let shrink = |x: f64| -> Result<f64, String> {
            if x < 1.0 {
                Err(format!("{x} is outside the domain"))
            } else {
                Ok(x / 2.0)
            }
        };
        let items: Vec<_> = Orbit::new(&shrink, 4.0).collect();
        assert_eq!(
            items,
            vec![Ok(2.0), Ok(1.0), Ok(0.5), Err("0.5 is outside the domain".to_string())]
        );
    }

    #[test]
    fn failed_advance_keeps_last_good_point() {
        let refuse = |_: f64| -> Result<f64, &'static str> { Err("undefined") };
        let mut orbit = Orbit::new(&refuse, 3.0);
        assert_eq!(orbit.advance(), Err("undefined"));
        assert_eq!(orbit.current(), 3.0);
        assert_eq!(orbit.steps(), 0);
    }

    #[test]
    fn iterate_applies_map_n_times() {
        let rotate = PureMap(|z: Complex64| z * Complex64::i());
        let z = iterate(&rotate, Complex64::new(1.0, 0.0), 2).unwrap();
        assert!((z - Complex64::new(-1.0, 0.0)).norm() < 1e-15);
        assert_eq!(iterate(&rotate, Complex64::new(3.0, 4.0), 0).unwrap(), Complex64::new(3.0, 4.0));
    }

    #[test]
    fn periodicity_residual_measures_return_distance() {
        let negate = PureMap(|x: f64| -x);
        assert_eq!(periodicity_residual(&negate, 1.5, 2).unwrap(), 0.0);
        assert_eq!(periodicity_residual(&negate, 1.5, 1).unwrap(), 3.0);
    }

    #[test]
    fn ratio_guards_zero_denominator() {
        assert_eq!(contraction_ratio(0.0, 0.0), 0.0);
        assert_eq!(contraction_ratio(1e-3, 0.0), 0.0);
        assert!((contraction_ratio(1e-3_f64, 4e-3) - 0.25).abs() < 1e-15);
        assert!(within_tolerance(1e-9, 1e-9));
        assert!(!within_tolerance(2e-9, 1e-9));
    }
}
