//! Runtime launcher: the port and entrypoint contract of the final image
//!
//! Both declarations are metadata consumed by the hosting platform. Exposing a
//! port does not make the application listen on it, and the entrypoint must be
//! idempotent and assume no prior in-container state. Neither property is
//! checkable here; [`probe`] verifies the former against a running container.

pub mod probe;

pub use probe::{ContractProbe, ProbeError, ProbeOptions, ProbeReport, CONTAINER_PREFIX};

use crate::descriptor::Directive;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("port 0 cannot be declared; the platform routes traffic to a fixed non-zero port")]
    ZeroPort,

    #[error("entrypoint command cannot be empty")]
    EmptyCommand,

    #[error("no port has been declared")]
    MissingPort,

    #[error("no entrypoint has been declared")]
    MissingEntrypoint,
}

/// Declared network surface and launch command of an image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeContract {
    pub port: u16,
    pub command: Vec<String>,
}

impl RuntimeContract {
    /// `EXPOSE` followed by exec-form `CMD`
    pub fn directives(&self) -> Vec<Directive> {
        vec![
            Directive::Expose(self.port),
            Directive::Cmd(self.command.clone()),
        ]
    }
}

#[derive(Debug, Default, Clone)]
pub struct RuntimeLauncher {
    port: Option<u16>,
    command: Option<Vec<String>>,
}

impl RuntimeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare_port(&mut self, port: u16) -> Result<&mut Self, LaunchError> {
        if port == 0 {
            return Err(LaunchError::ZeroPort);
        }
        debug!(port, "Declared runtime port");
        self.port = Some(port);
        Ok(self)
    }

    pub fn declare_entrypoint<S: AsRef<str>>(
        &mut self,
        command: &str,
        args: &[S],
    ) -> Result<&mut Self, LaunchError> {
        if command.trim().is_empty() {
            return Err(LaunchError::EmptyCommand);
        }
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(command.to_string());
        argv.extend(args.iter().map(|a| a.as_ref().to_string()));
        debug!(command = %argv.join(" "), "Declared entrypoint");
        self.command = Some(argv);
        Ok(self)
    }

    pub fn contract(&self) -> Result<RuntimeContract, LaunchError> {
        Ok(RuntimeContract {
            port: self.port.ok_or(LaunchError::MissingPort)?,
            command: self.command.clone().ok_or(LaunchError::MissingEntrypoint)?,
        })
    }
}
