//! vigil-check — flap-damped health checking for Vigil.
//!
//! A [`CheckEngine`] wraps one probe and filters its raw results
//! through rise/fall hysteresis: a service must fail `fall` checks in
//! a row before it is reported down, and pass `rise` in a row before
//! it is reported up again. The bounded history lives in a
//! [`RingBuffer`] sized `max(rise, fall)`.
//!
//! # Architecture
//!
//! ```text
//! CheckEngine::evaluate()
//!   ├── Probe (tcp connect | http get | script exec), bounded by timeout
//!   ├── RingBuffer<bool> history of raw results
//!   └── hysteresis decision → reported bool
//! ```
//!
//! Probe errors never escape `evaluate()` — every error class folds
//! into a failed check.

pub mod engine;
pub mod probe;
pub mod ring;

pub use engine::CheckEngine;
pub use probe::Probe;
pub use ring::{RingBuffer, RingError};
