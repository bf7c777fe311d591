// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! The closed catalog of logical fabric endpoints and their per-transport
//! concrete locations.

use aiperf_config::TransportConfig;
use std::fmt;
use std::path::PathBuf;

/// Logical endpoints services bind or connect to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    /// Services publish event bus messages here; the proxy fans them out.
    EventBusProxyFrontend,
    /// Services subscribe to event bus messages here.
    EventBusProxyBackend,
    /// Credit drops from the timing manager to the worker pool.
    CreditDrop,
    /// Credit returns from workers back to the timing manager.
    CreditReturn,
    /// Metric record batches bound for the results processor.
    Records,
    /// Conversation requests from workers to the dataset proxy.
    DatasetProxyFrontend,
    /// Dataset provider side of the dataset proxy.
    DatasetProxyBackend,
    /// Raw inference records from workers to the record-processor proxy.
    RawInferenceProxyFrontend,
    /// Record processor side of the raw inference proxy.
    RawInferenceProxyBackend,
}

impl Address {
    /// All addresses, in port-offset order.
    pub const ALL: [Address; 9] = [
        Address::EventBusProxyFrontend,
        Address::EventBusProxyBackend,
        Address::CreditDrop,
        Address::CreditReturn,
        Address::Records,
        Address::DatasetProxyFrontend,
        Address::DatasetProxyBackend,
        Address::RawInferenceProxyFrontend,
        Address::RawInferenceProxyBackend,
    ];

    /// Stable name used in logs and IPC socket filenames.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Address::EventBusProxyFrontend => "event_bus_proxy_frontend",
            Address::EventBusProxyBackend => "event_bus_proxy_backend",
            Address::CreditDrop => "credit_drop",
            Address::CreditReturn => "credit_return",
            Address::Records => "records",
            Address::DatasetProxyFrontend => "dataset_manager_proxy_frontend",
            Address::DatasetProxyBackend => "dataset_manager_proxy_backend",
            Address::RawInferenceProxyFrontend => "raw_inference_proxy_frontend",
            Address::RawInferenceProxyBackend => "raw_inference_proxy_backend",
        }
    }

    /// Offset of this address within a TCP port block.
    #[must_use]
    pub fn port_offset(self) -> u16 {
        match self {
            Address::EventBusProxyFrontend => 0,
            Address::EventBusProxyBackend => 1,
            Address::CreditDrop => 2,
            Address::CreditReturn => 3,
            Address::Records => 4,
            Address::DatasetProxyFrontend => 5,
            Address::DatasetProxyBackend => 6,
            Address::RawInferenceProxyFrontend => 7,
            Address::RawInferenceProxyBackend => 8,
        }
    }

    /// The concrete location of this address under a transport.
    #[must_use]
    pub fn endpoint(self, transport: &TransportConfig) -> Endpoint {
        match transport {
            TransportConfig::Tcp { host, base_port } => Endpoint::Tcp {
                host: host.clone(),
                port: base_port + self.port_offset(),
            },
            TransportConfig::Ipc { run_dir } => {
                Endpoint::Ipc { path: run_dir.join(format!("{}.sock", self.as_str())) }
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A concrete socket location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// TCP `host:port`.
    Tcp {
        /// Host to bind or connect on.
        host: String,
        /// Port to bind or connect on.
        port: u16,
    },
    /// Unix domain socket path.
    Ipc {
        /// Filesystem path of the socket.
        path: PathBuf,
    },
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            Endpoint::Ipc { path } => write!(f, "ipc://{}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_ports_are_contiguous_and_distinct() {
        let transport = TransportConfig::Tcp { host: "127.0.0.1".to_string(), base_port: 6000 };
        let mut ports: Vec<u16> = Address::ALL
            .iter()
            .map(|a| match a.endpoint(&transport) {
                Endpoint::Tcp { port, .. } => port,
                Endpoint::Ipc { .. } => unreachable!("tcp transport"),
            })
            .collect();
        ports.sort_unstable();
        ports.dedup();
        assert_eq!(ports.len(), Address::ALL.len());
        assert_eq!(ports[0], 6000);
        assert_eq!(*ports.last().expect("ports"), 6000 + Address::ALL.len() as u16 - 1);
    }

    #[test]
    fn ipc_paths_are_scoped_to_the_run_dir() {
        let transport = TransportConfig::Ipc { run_dir: PathBuf::from("/tmp/aiperf-run") };
        match Address::CreditDrop.endpoint(&transport) {
            Endpoint::Ipc { path } => {
                assert_eq!(path, PathBuf::from("/tmp/aiperf-run/credit_drop.sock"));
            }
            Endpoint::Tcp { .. } => unreachable!("ipc transport"),
        }
    }
}
