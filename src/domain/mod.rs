//! Core domain types and logic.

pub mod churn;
pub mod config_validation;
pub mod error;
pub mod opportunity;
pub mod scan;
pub mod symbols;
