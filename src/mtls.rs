//! mTLS configuration for the aggregator gRPC channel
//!
//! Builds the tonic client TLS config from credential byte blobs. The
//! private key is held in a [`Zeroizing`] buffer so it is wiped on drop.

use tonic::transport::{Certificate, ClientTlsConfig, Identity};
use zeroize::Zeroizing;

use crate::error::Error;

/// Client-side mTLS configuration
pub struct ClientMtlsConfig {
    /// Client certificate PEM bytes (signed by the federation CA)
    pub client_cert_pem: Vec<u8>,
    /// Client private key PEM bytes (zeroized on drop)
    pub client_key_pem: Zeroizing<Vec<u8>>,
    /// CA certificate PEM bytes for verifying the aggregator
    pub ca_cert_pem: Vec<u8>,
    /// Aggregator domain name for TLS verification
    pub server_domain: String,
}

impl ClientMtlsConfig {
    /// Create a new client mTLS config
    pub fn new(
        client_cert_pem: Vec<u8>,
        client_key_pem: Zeroizing<Vec<u8>>,
        ca_cert_pem: Vec<u8>,
        server_domain: String,
    ) -> Self {
        Self {
            client_cert_pem,
            client_key_pem,
            ca_cert_pem,
            server_domain,
        }
    }

    /// Build a tonic ClientTlsConfig with mutual authentication
    pub fn to_tonic_config(&self) -> Result<ClientTlsConfig, Error> {
        let identity = Identity::from_pem(&self.client_cert_pem, self.client_key_pem.as_slice());
        let ca_cert = Certificate::from_pem(&self.ca_cert_pem);

        Ok(ClientTlsConfig::new()
            .identity(identity)
            .ca_certificate(ca_cert)
            .domain_name(&self.server_domain))
    }
}

/// Build a server-auth-only TLS config (client authentication disabled).
///
/// The aggregator is still verified against the CA, but no client identity
/// is presented.
pub fn server_auth_only_config(
    ca_cert_pem: &[u8],
    server_domain: &str,
) -> Result<ClientTlsConfig, Error> {
    let ca_cert = Certificate::from_pem(ca_cert_pem);

    Ok(ClientTlsConfig::new()
        .ca_certificate(ca_cert)
        .domain_name(server_domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{generate_simple_self_signed, CertifiedKey};

    fn create_test_certs() -> (Vec<u8>, Zeroizing<Vec<u8>>, Vec<u8>) {
        let CertifiedKey { cert, key_pair } =
            generate_simple_self_signed(vec!["collab-1.fed.local".to_string()])
                .expect("cert generation should succeed");
        let ca = generate_simple_self_signed(vec!["aggregator.fed.local".to_string()])
            .expect("CA generation should succeed");

        (
            cert.pem().into_bytes(),
            Zeroizing::new(key_pair.serialize_pem().into_bytes()),
            ca.cert.pem().into_bytes(),
        )
    }

    #[test]
    fn test_client_tls_config() {
        let (cert, key, ca) = create_test_certs();
        let config = ClientMtlsConfig::new(cert, key, ca, "aggregator.fed.local".to_string());

        assert!(config.to_tonic_config().is_ok());
    }

    #[test]
    fn test_server_auth_only_config() {
        let (_, _, ca) = create_test_certs();

        assert!(server_auth_only_config(&ca, "aggregator.fed.local").is_ok());
    }
}
