//! tests/mod.rs
pub mod support;

mod template_tests;
