//! The `orbit_core` crate locates the attracting cycle that an iterated map settles on
//! when points can only be compared up to a tolerance.
//! It is generic over the point type: complex numbers (`num_complex::Complex<T>`)
//! and plain reals (`f32`, `f64`) are supported out of the box.
//!
//! Key components:
//! - **Traits**: `Scalar` (real magnitudes), `Point` (orbit states), `IteratedMap` (the map F).
//! - **Cycle**: fast-path fixed point check, tolerance-aware tortoise/hare detection and period refinement.
//! - **Orbit**: a stepper for a_{n+1} = F(a_n) plus periodicity and ratio helpers.
//! - **Settings**: tolerance and iteration budget, with a precision-derived default tolerance.
//! - **Equation Engine**: a bytecode VM for maps written as text in `z`.
pub mod cycle;
pub mod equation_engine;
pub mod error;
pub mod orbit;
pub mod settings;
pub mod traits;

pub use cycle::{find_cycle, Cycle, CycleOutcome, Phase};
pub use error::CycleError;
pub use settings::CycleSettings;
pub use traits::{IteratedMap, Point, PureMap};
