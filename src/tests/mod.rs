//! Crate-level test suites exercising the layers together.

mod common;
mod stress_tests;
