//! Transport channel construction for the aggregator connection
//!
//! [`ChannelFactory`] turns an endpoint plus a security posture into a tonic
//! channel. Channels are opened lazily so dial failures surface through the
//! RPC path as `Unavailable` statuses, where the retry layer can see them.

use std::fmt;

use tonic::transport::{Channel, Endpoint};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::error::Error;
use crate::mtls::{self, ClientMtlsConfig};
use crate::Result;

/// Network address of the aggregator. Immutable after client construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregatorEndpoint {
    host: String,
    port: u16,
}

impl AggregatorEndpoint {
    /// Create an endpoint from host and port
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Aggregator hostname, also used as the TLS verification domain
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Aggregator port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port` connection target
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for AggregatorEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Security posture for the aggregator channel.
///
/// In mutual-TLS mode the root certificate is always required; client
/// certificate and key are required unless client authentication is
/// explicitly disabled.
pub enum SecurityConfig {
    /// Plaintext channel. Emits a warning on every open; not recommended
    /// outside local development.
    Insecure,
    /// TLS channel, mutually authenticated unless `disable_client_auth` is set
    Mtls {
        /// CA certificate PEM bytes for verifying the aggregator
        root_certificate: Vec<u8>,
        /// Client certificate PEM bytes (signed by the federation CA)
        certificate: Option<Vec<u8>>,
        /// Client private key PEM bytes (zeroized on drop)
        private_key: Option<Zeroizing<Vec<u8>>>,
        /// Skip presenting a client identity (server-auth only, discouraged)
        disable_client_auth: bool,
    },
}

/// Builds transport channels from an endpoint and a security posture.
///
/// Stateless beyond its arguments; the client calls it once at construction
/// and once per reconnect.
pub struct ChannelFactory;

impl ChannelFactory {
    /// Open a channel to the aggregator.
    ///
    /// Fails with [`Error::TransportConfig`] if required credential material
    /// is missing in TLS mode. The returned channel dials lazily on first
    /// use.
    pub fn open(endpoint: &AggregatorEndpoint, security: &SecurityConfig) -> Result<Channel> {
        match security {
            SecurityConfig::Insecure => {
                warn!(
                    endpoint = %endpoint,
                    "gRPC is running on an insecure channel with TLS disabled"
                );
                let uri = format!("http://{}", endpoint.authority());
                let channel = Endpoint::from_shared(uri)
                    .map_err(|e| Error::InvalidEndpoint(e.to_string()))?
                    .connect_lazy();
                Ok(channel)
            }
            SecurityConfig::Mtls {
                root_certificate,
                certificate,
                private_key,
                disable_client_auth,
            } => {
                if root_certificate.is_empty() {
                    return Err(Error::transport_config(
                        "root certificate is required in TLS mode",
                    ));
                }

                let tls_config = if *disable_client_auth {
                    warn!("Client-side authentication is disabled");
                    mtls::server_auth_only_config(root_certificate, endpoint.host())?
                } else {
                    match (certificate, private_key) {
                        (Some(cert), Some(key)) => ClientMtlsConfig::new(
                            cert.clone(),
                            key.clone(),
                            root_certificate.clone(),
                            endpoint.host().to_string(),
                        )
                        .to_tonic_config()?,
                        _ => {
                            return Err(Error::transport_config(
                                "client certificate and private key are required for mutual TLS",
                            ))
                        }
                    }
                };

                let uri = format!("https://{}", endpoint.authority());
                debug!(endpoint = %endpoint, "Opening TLS channel to aggregator");
                let channel = Endpoint::from_shared(uri)
                    .map_err(|e| Error::InvalidEndpoint(e.to_string()))?
                    .tls_config(tls_config)
                    .map_err(|e| Error::Tls(e.to_string()))?
                    .connect_lazy();
                Ok(channel)
            }
        }
    }
}
