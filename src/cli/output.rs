//! Output formatting for the CLI
//!
//! Every command result can be printed as JSON, YAML or human-readable text.
//! Machine formats go to stdout unchanged so they can be piped.

use anyhow::{Context, Result};
use serde::Serialize;

use crate::builder::{BuildPlan, BuiltImage};
use crate::config::RunpackConfig;
use crate::descriptor::ImageDescriptor;
use crate::launcher::ProbeReport;
use crate::validation::{Severity, ValidationReport};

const RULE: &str = "\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}\u{2501}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Yaml,
    Human,
}

pub struct OutputFormatter {
    format: OutputFormat,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Descriptor as a file body; human format falls back to the summary
    pub fn format_descriptor(&self, descriptor: &ImageDescriptor) -> Result<String> {
        match self.format {
            OutputFormat::Json => descriptor.to_json(),
            OutputFormat::Yaml => descriptor.to_yaml(),
            OutputFormat::Human => Ok(descriptor.to_string()),
        }
    }

    /// Descriptor summary with its rendered plan and fingerprint
    pub fn format_summary(&self, descriptor: &ImageDescriptor, plan: &BuildPlan) -> Result<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => {
                let output = serde_json::json!({
                    "descriptor": descriptor,
                    "fingerprint": plan.fingerprint(),
                    "steps": plan.steps,
                });
                self.serialize(&output, "descriptor summary")
            }
            OutputFormat::Human => {
                let mut output = descriptor.to_string();
                output.push_str(&format!("\nBuild Steps ({}):\n", plan.len()));
                for (i, step) in plan.steps.iter().enumerate() {
                    output.push_str(&format!("  {:>2}. [{}] {}\n", i + 1, step.stage, step.directive));
                }
                output.push_str(&format!("\nFingerprint: {}\n", plan.fingerprint()));
                Ok(output)
            }
        }
    }

    pub fn format_report(&self, report: &ValidationReport) -> Result<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => self.serialize(report, "validation report"),
            OutputFormat::Human => {
                let mut output = String::new();
                if report.is_ok() {
                    output.push_str("\u{2713} Descriptor is valid\n");
                } else {
                    output.push_str("\u{2717} Descriptor is invalid\n");
                }
                output.push_str(RULE);
                output.push_str("\n\n");

                if report.findings.is_empty() {
                    output.push_str("No findings\n");
                }
                for finding in &report.findings {
                    let symbol = match finding.severity {
                        Severity::Error => "\u{2717}",
                        Severity::Warning => "\u{26A0}",
                    };
                    output.push_str(&format!("{} [{}] {}\n", symbol, finding.rule, finding.message));
                }

                let errors = report.errors().count();
                let warnings = report.warnings().count();
                output.push_str(&format!("\n{} error(s), {} warning(s)\n", errors, warnings));
                Ok(output)
            }
        }
    }

    pub fn format_built(&self, image: &BuiltImage) -> Result<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => self.serialize(image, "build result"),
            OutputFormat::Human => {
                let mut output = String::new();
                output.push_str("\u{2713} Image built\n");
                output.push_str(RULE);
                output.push_str("\n\n");
                output.push_str(&format!("Tag:         {}\n", image.tag));
                output.push_str(&format!("Image ID:    {}\n", image.id));
                output.push_str(&format!("Fingerprint: {}\n", image.fingerprint));
                output.push_str(&format!("\nBuilt in {}ms\n", image.duration.as_millis()));
                Ok(output)
            }
        }
    }

    pub fn format_probe(&self, report: &ProbeReport) -> Result<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => {
                let other_ports: Vec<serde_json::Value> = report
                    .other_ports
                    .iter()
                    .map(|p| serde_json::json!({ "port": p.port, "reachable": p.reachable }))
                    .collect();
                let output = serde_json::json!({
                    "image": report.image,
                    "port": report.port,
                    "reachable": report.reachable,
                    "elapsed_ms": report.elapsed.as_millis() as u64,
                    "exited": report.exited,
                    "other_ports": other_ports,
                    "satisfied": report.is_satisfied(),
                });
                self.serialize(&output, "probe report")
            }
            OutputFormat::Human => {
                let mut output = String::new();
                if report.is_satisfied() {
                    output.push_str("\u{2713} Runtime contract satisfied\n");
                } else {
                    output.push_str("\u{2717} Runtime contract violated\n");
                }
                output.push_str(RULE);
                output.push_str("\n\n");
                output.push_str(&format!("Image: {}\n", report.image));
                if report.reachable {
                    output.push_str(&format!(
                        "Port {} answered after {}ms\n",
                        report.port,
                        report.elapsed.as_millis()
                    ));
                } else if report.exited {
                    output.push_str(&format!(
                        "Container exited before port {} answered\n",
                        report.port
                    ));
                } else {
                    output.push_str(&format!(
                        "Port {} did not answer within {}ms\n",
                        report.port,
                        report.elapsed.as_millis()
                    ));
                }
                for check in &report.other_ports {
                    let state = if check.reachable { "answered" } else { "closed" };
                    output.push_str(&format!("Port {}: {}\n", check.port, state));
                }
                if !report.logs.is_empty() {
                    output.push_str("\nContainer logs:\n");
                    for line in report.logs.lines() {
                        output.push_str(&format!("  {}\n", line));
                    }
                }
                Ok(output)
            }
        }
    }

    pub fn format_config(&self, config: &RunpackConfig) -> Result<String> {
        match self.format {
            OutputFormat::Json | OutputFormat::Yaml => {
                self.serialize(&config.to_display_map(), "config")
            }
            OutputFormat::Human => Ok(config.to_string()),
        }
    }

    fn serialize<T: Serialize + ?Sized>(&self, value: &T, what: &str) -> Result<String> {
        match self.format {
            OutputFormat::Yaml => {
                serde_yaml::to_string(value).with_context(|| format!("Failed to serialize {} to YAML", what))
            }
            _ => serde_json::to_string_pretty(value)
                .with_context(|| format!("Failed to serialize {} to JSON", what)),
        }
    }
}
