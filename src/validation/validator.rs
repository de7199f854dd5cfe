use crate::descriptor::ImageDescriptor;
use crate::validation::rules::{
    BuildPlanRule, CacheCleanupRule, EntrypointExistsRule, ManifestRule, PinnedBaseRule,
    PortConsistencyRule, PortRangeRule, RequiredFieldsRule, ValidationContext, ValidationRule,
};
use anyhow::Result;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Finding {
    pub rule: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{}: [{}] {}", level, self.rule, self.message)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.errors().next().is_none()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| f.severity == Severity::Warning)
    }
}

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Stop at the first failing rule
    pub fn validate(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(descriptor, ctx) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }

    /// Run every rule and collect errors and warnings
    pub fn report(&self, descriptor: &ImageDescriptor, ctx: &ValidationContext) -> ValidationReport {
        let mut report = ValidationReport::default();
        for rule in &self.rules {
            match rule.validate(descriptor, ctx) {
                Ok(warnings) => report.findings.extend(warnings.into_iter().map(|message| Finding {
                    rule: rule.name(),
                    severity: Severity::Warning,
                    message,
                })),
                Err(e) => report.findings.push(Finding {
                    rule: rule.name(),
                    severity: Severity::Error,
                    message: format!("{:#}", e),
                }),
            }
        }
        report
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(PinnedBaseRule),
                Box::new(PortRangeRule),
                Box::new(BuildPlanRule),
                Box::new(EntrypointExistsRule),
                Box::new(ManifestRule),
                Box::new(PortConsistencyRule),
                Box::new(CacheCleanupRule),
            ],
        }
    }
}
