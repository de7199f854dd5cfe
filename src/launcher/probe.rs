//! Contract probe: launch a built image and check which ports answer
//!
//! The container is started the way the hosting platform starts it, with the
//! port variable injected, and the declared port is published to an ephemeral
//! host port on 127.0.0.1.

use super::RuntimeContract;
use bollard::container::{Config, LogsOptions, RemoveContainerOptions, StartContainerOptions};
use bollard::service::{HostConfig, PortBinding};
use bollard::Docker;
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);
const LOG_TAIL_LINES: &str = "50";
/// Name prefix of every container the probe creates
pub const CONTAINER_PREFIX: &str = "runpack-probe-";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("container engine error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error("container port {0}/tcp has no published host port")]
    NoHostPort(u16),
}

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub startup_timeout: Duration,
    pub poll_interval: Duration,
    /// Ports that must not answer while the declared port does
    pub also_check: Vec<u16>,
    /// Environment variable carrying the port into the container
    pub port_env_var: String,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(250),
            also_check: Vec::new(),
            port_env_var: "PORT".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PortCheck {
    pub port: u16,
    pub reachable: bool,
}

#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub image: String,
    pub port: u16,
    pub reachable: bool,
    pub elapsed: Duration,
    pub other_ports: Vec<PortCheck>,
    /// Set when the container stopped before the port answered
    pub exited: bool,
    pub logs: String,
}

impl ProbeReport {
    /// Declared port answered and no other checked port did
    pub fn is_satisfied(&self) -> bool {
        self.reachable && self.other_ports.iter().all(|p| !p.reachable)
    }
}

pub struct ContractProbe {
    docker: Docker,
}

impl ContractProbe {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    pub fn connect() -> Result<Self, ProbeError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }

    pub async fn verify(
        &self,
        image: &str,
        contract: &RuntimeContract,
        options: &ProbeOptions,
    ) -> Result<ProbeReport, ProbeError> {
        let name = format!("{}{}", CONTAINER_PREFIX, uuid::Uuid::new_v4());
        let mut ports = vec![contract.port];
        ports.extend(options.also_check.iter().filter(|p| **p != contract.port));

        info!(image, container = %name, port = contract.port, "Starting contract probe");
        self.create(image, &name, contract.port, &ports, options).await?;

        // once created, the container is removed whether or not it starts
        let outcome = match self.start(&name).await {
            Ok(()) => self.observe(image, &name, contract, &ports, options).await,
            Err(e) => {
                warn!(container = %name, error = %e, "Probe container failed to start");
                Err(e)
            }
        };

        if let Err(e) = self
            .docker
            .remove_container(
                &name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            warn!(container = %name, error = %e, "Failed to remove probe container");
        }

        outcome
    }

    async fn create(
        &self,
        image: &str,
        name: &str,
        port: u16,
        ports: &[u16],
        options: &ProbeOptions,
    ) -> Result<(), ProbeError> {
        let exposed_ports = ports
            .iter()
            .map(|p| (format!("{}/tcp", p), HashMap::new()))
            .collect();
        let port_bindings = ports
            .iter()
            .map(|p| {
                (
                    format!("{}/tcp", p),
                    Some(vec![PortBinding {
                        host_ip: Some("127.0.0.1".to_string()),
                        host_port: Some("0".to_string()),
                    }]),
                )
            })
            .collect();

        let config = Config {
            image: Some(image.to_string()),
            env: Some(vec![format!("{}={}", options.port_env_var, port)]),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(
                Some(bollard::container::CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), ProbeError> {
        self.docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn observe(
        &self,
        image: &str,
        name: &str,
        contract: &RuntimeContract,
        ports: &[u16],
        options: &ProbeOptions,
    ) -> Result<ProbeReport, ProbeError> {
        let host_ports = self.host_ports(name, ports).await?;
        let declared = host_addr(&host_ports, contract.port)?;

        let started = Instant::now();
        let mut reachable = false;
        let mut exited = false;

        while started.elapsed() < options.startup_timeout {
            if responds(declared).await {
                reachable = true;
                break;
            }

            let inspect = self.docker.inspect_container(name, None).await?;
            if inspect.state.and_then(|s| s.running) != Some(true) {
                exited = true;
                break;
            }

            tokio::time::sleep(options.poll_interval).await;
        }
        let elapsed = started.elapsed();

        let mut other_ports = Vec::new();
        for port in ports.iter().filter(|p| **p != contract.port) {
            let addr = host_addr(&host_ports, *port)?;
            let reachable = responds(addr).await;
            debug!(port, reachable, "Checked undeclared port");
            other_ports.push(PortCheck {
                port: *port,
                reachable,
            });
        }

        let logs = if reachable {
            String::new()
        } else {
            self.logs(name).await
        };

        Ok(ProbeReport {
            image: image.to_string(),
            port: contract.port,
            reachable,
            elapsed,
            other_ports,
            exited,
            logs,
        })
    }

    async fn host_ports(&self, name: &str, ports: &[u16]) -> Result<HashMap<u16, u16>, ProbeError> {
        let inspect = self.docker.inspect_container(name, None).await?;
        let published = inspect
            .network_settings
            .and_then(|ns| ns.ports)
            .unwrap_or_default();

        let mut mapping = HashMap::new();
        for port in ports {
            let host_port = published
                .get(&format!("{}/tcp", port))
                .cloned()
                .flatten()
                .and_then(|bindings| bindings.into_iter().find_map(|b| b.host_port))
                .and_then(|p| p.parse::<u16>().ok())
                .ok_or(ProbeError::NoHostPort(*port))?;
            mapping.insert(*port, host_port);
        }
        Ok(mapping)
    }

    async fn logs(&self, name: &str) -> String {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: LOG_TAIL_LINES.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut output = String::new();
        while let Some(Ok(chunk)) = stream.next().await {
            output.push_str(&chunk.to_string());
        }
        output
    }
}

fn host_addr(mapping: &HashMap<u16, u16>, port: u16) -> Result<SocketAddr, ProbeError> {
    mapping
        .get(&port)
        .map(|host_port| SocketAddr::from(([127, 0, 0, 1], *host_port)))
        .ok_or(ProbeError::NoHostPort(port))
}

/// A port answers when it accepts a connection and sends at least one byte back.
///
/// A published port always accepts on the host side; the proxy drops the
/// connection when nothing listens inside the container.
pub(crate) async fn responds(addr: SocketAddr) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(addr).await.ok()?;
        stream
            .write_all(b"HEAD / HTTP/1.0\r\nHost: localhost\r\n\r\n")
            .await
            .ok()?;
        let mut buf = [0u8; 1];
        let read = stream.read(&mut buf).await.ok()?;
        Some(read > 0)
    };

    matches!(
        tokio::time::timeout(RESPONSE_TIMEOUT, attempt).await,
        Ok(Some(true))
    )
}
