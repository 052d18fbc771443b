//! Tolerance-aware cycle detection for iterated maps.
//!
//! The search runs in three phases:
//! 1. a fast-path check for an orbit that has already settled on a fixed point,
//! 2. Floyd's tortoise/hare detector with approximate equality,
//! 3. a refiner that walks forward from the detected point to find the
//!    smallest period and the contraction ratio.

use crate::{
    error::CycleError,
    orbit::{contraction_ratio, within_tolerance, Orbit},
    settings::CycleSettings,
    traits::{IteratedMap, Point},
};
use num_traits::One;
use serde::Serialize;
use tracing::{debug, warn};

/// An approximately periodic point of the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Cycle<P, T> {
    pub period: usize,
    pub representative: P,
    /// Closeness of this pass relative to the previous one; below 1 for a contracting orbit.
    pub ratio: T,
}

impl<P, T> Cycle<P, T> {
    pub fn into_tuple(self) -> (usize, P, T) {
        (self.period, self.representative, self.ratio)
    }
}

/// Which phase produced a converged cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    FastPath,
    Refinement,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CycleOutcome<P, T> {
    Converged { cycle: Cycle<P, T>, phase: Phase },
    /// The detector ran out of iterations. The cycle is the sentinel
    /// `(max_iterations, hare, 1.0)` and does not describe a real period.
    IterationLimit { cycle: Cycle<P, T> },
    /// A near-cycle point was found but no return within tolerance
    /// happened in `max_iterations` steps.
    PeriodNotFound { anchor: P, closeness: T },
}

impl<P, T> CycleOutcome<P, T> {
    pub fn is_converged(&self) -> bool {
        matches!(self, CycleOutcome::Converged { .. })
    }

    /// The cycle, only if the search converged.
    pub fn converged(&self) -> Option<&Cycle<P, T>> {
        match self {
            CycleOutcome::Converged { cycle, .. } => Some(cycle),
            _ => None,
        }
    }

    /// The reported cycle, including the iteration-limit sentinel.
    pub fn into_cycle(self) -> Option<Cycle<P, T>> {
        match self {
            CycleOutcome::Converged { cycle, .. } | CycleOutcome::IterationLimit { cycle } => {
                Some(cycle)
            }
            CycleOutcome::PeriodNotFound { .. } => None,
        }
    }
}

/// First two orbit points, and a fixed point if they already agree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastPath<P, T> {
    pub tortoise: P,
    pub hare: P,
    pub fixed_point: Option<Cycle<P, T>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Detection<P, T> {
    Near { point: P, closeness: T },
    Exhausted { hare: P },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Refinement<P, T> {
    Found { period: usize, point: P, closeness: T },
    Exhausted,
}

/// Computes F(a0) and F(F(a0)) and checks whether they coincide within tolerance.
pub fn fast_path<M, P>(
    map: &M,
    start: P,
    tolerance: P::Magnitude,
) -> Result<FastPath<P, P::Magnitude>, M::Error>
where
    M: IteratedMap<P>,
    P: Point,
{
    let tortoise = map.apply(start)?;
    let hare = map.apply(tortoise)?;
    let step = hare.distance(&tortoise);

    let fixed_point = within_tolerance(step, tolerance).then(|| Cycle {
        period: 1,
        representative: hare,
        ratio: contraction_ratio(step, tortoise.distance(&start)),
    });

    Ok(FastPath {
        tortoise,
        hare,
        fixed_point,
    })
}

/// Floyd's tortoise and hare with approximate equality.
///
/// The tortoise moves one step and the hare two per iteration; the search
/// stops once they are within `tolerance` of each other.
pub fn detect_cycle<M, P>(
    map: &M,
    tortoise: P,
    hare: P,
    tolerance: P::Magnitude,
    max_iterations: usize,
) -> Result<Detection<P, P::Magnitude>, M::Error>
where
    M: IteratedMap<P>,
    P: Point,
{
    let mut slow = Orbit::new(map, tortoise);
    let mut fast = Orbit::new(map, hare);

    for k in 1..=max_iterations {
        let t = slow.advance()?;
        let h = fast.advance_by(2)?;
        let closeness = h.distance(&t);
        if within_tolerance(closeness, tolerance) {
            debug!(iteration = k, closeness = ?closeness, "tortoise and hare met");
            return Ok(Detection::Near {
                point: h,
                closeness,
            });
        }
    }

    Ok(Detection::Exhausted {
        hare: fast.current(),
    })
}

/// Walks forward from `anchor` until the orbit returns within `tolerance`.
/// The first such step count is the period.
pub fn refine_period<M, P>(
    map: &M,
    anchor: P,
    tolerance: P::Magnitude,
    max_iterations: usize,
) -> Result<Refinement<P, P::Magnitude>, M::Error>
where
    M: IteratedMap<P>,
    P: Point,
{
    let mut walker = Orbit::new(map, anchor);
    for period in 1..=max_iterations {
        let point = walker.advance()?;
        let closeness = point.distance(&anchor);
        if within_tolerance(closeness, tolerance) {
            return Ok(Refinement::Found {
                period,
                point,
                closeness,
            });
        }
    }
    Ok(Refinement::Exhausted)
}

/// Finds the attracting cycle that the orbit of `start` settles on.
///
/// Errors from the map abort the search and are returned as
/// [`CycleError::Map`]. Running out of iterations is reported through the
/// outcome, never as an error.
pub fn find_cycle<M, P>(
    map: &M,
    start: P,
    settings: &CycleSettings<P::Magnitude>,
) -> Result<CycleOutcome<P, P::Magnitude>, CycleError<M::Error>>
where
    M: IteratedMap<P>,
    P: Point,
{
    settings.check::<M::Error>()?;
    let tolerance = settings.tolerance;
    let max_iterations = settings.max_iterations;

    let start_pair = fast_path(map, start, tolerance).map_err(CycleError::Map)?;
    if let Some(cycle) = start_pair.fixed_point {
        debug!(ratio = ?cycle.ratio, "orbit settled on a fixed point within two steps");
        return Ok(CycleOutcome::Converged {
            cycle,
            phase: Phase::FastPath,
        });
    }

    let detection = detect_cycle(
        map,
        start_pair.tortoise,
        start_pair.hare,
        tolerance,
        max_iterations,
    )
    .map_err(CycleError::Map)?;

    let (anchor, detected_closeness) = match detection {
        Detection::Near { point, closeness } => (point, closeness),
        Detection::Exhausted { hare } => {
            warn!(
                max_iterations,
                tolerance = ?tolerance,
                "maximum iterations exceeded while searching for a cycle"
            );
            return Ok(CycleOutcome::IterationLimit {
                cycle: Cycle {
                    period: max_iterations,
                    representative: hare,
                    ratio: <P::Magnitude as One>::one(),
                },
            });
        }
    };

    match refine_period(map, anchor, tolerance, max_iterations).map_err(CycleError::Map)? {
        Refinement::Found {
            period,
            point,
            closeness,
        } => {
            let ratio = contraction_ratio(closeness, detected_closeness);
            debug!(period, ratio = ?ratio, "cycle period refined");
            Ok(CycleOutcome::Converged {
                cycle: Cycle {
                    period,
                    representative: point,
                    ratio,
                },
                phase: Phase::Refinement,
            })
        }
        Refinement::Exhausted => {
            warn!(
                max_iterations,
                tolerance = ?tolerance,
                closeness = ?detected_closeness,
                "period not found within maximum iterations"
            );
            Ok(CycleOutcome::PeriodNotFound {
                anchor,
                closeness: detected_closeness,
            })
        }
    }
}
