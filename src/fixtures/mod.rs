//! Randomized, constrained test inputs.

pub mod sample;

pub use sample::{arr_str, constrained_sum_sample_pos, seeded_rng, ts_now};
