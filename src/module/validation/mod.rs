//! Module validation framework
//!
//! Provides build descriptor validation: coordinate structure and declared
//! dependency checks.

pub mod descriptor_validator;

pub use descriptor_validator::{DescriptorValidator, ValidationResult};
