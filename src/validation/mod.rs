pub mod rules;
pub mod validator;

pub use rules::{ValidationContext, ValidationRule};
pub use validator::{Finding, Severity, ValidationReport, Validator};
