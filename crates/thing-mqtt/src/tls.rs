//! Server address parsing and TLS transport selection.
//!
//! Addresses carry their transport in the scheme:
//! `ssl://`, `tls://`, `mqtts://` connect over TLS (default port 8883),
//! `tcp://`, `mqtt://` connect in plaintext (default port 1883).

use std::path::Path;

use rumqttc::{TlsConfiguration, Transport};
use url::Url;

use crate::error::{MqttError, MqttResult};

const TLS_PORT: u16 = 8883;
const PLAIN_PORT: u16 = 1883;

/// A parsed broker address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl ServerAddress {
    pub fn parse(address: &str) -> MqttResult<Self> {
        let invalid = || MqttError::InvalidAddress(address.to_string());

        let url = Url::parse(address).map_err(|_| invalid())?;
        let use_tls = match url.scheme() {
            "ssl" | "tls" | "mqtts" => true,
            "tcp" | "mqtt" => false,
            _ => return Err(invalid()),
        };
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(invalid)?
            .to_string();
        let port = url
            .port()
            .unwrap_or(if use_tls { TLS_PORT } else { PLAIN_PORT });

        Ok(Self {
            host,
            port,
            use_tls,
        })
    }
}

impl std::fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let scheme = if self.use_tls { "ssl" } else { "tcp" };
        write!(f, "{scheme}://{}:{}", self.host, self.port)
    }
}

/// Build the rumqttc transport for `address`.
///
/// TLS connections trust `ca_path` when given (PEM), otherwise the
/// platform roots. Devices authenticate with the JWT password, so no
/// client certificate is presented.
pub fn transport(address: &ServerAddress, ca_path: Option<&Path>) -> MqttResult<Transport> {
    if !address.use_tls {
        return Ok(Transport::Tcp);
    }

    match ca_path {
        Some(path) => {
            let ca = std::fs::read(path).map_err(|e| {
                MqttError::Tls(format!(
                    "failed to read CA cert '{}': {e}",
                    path.display()
                ))
            })?;
            Ok(Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            }))
        }
        None => Ok(Transport::tls_with_default_config()),
    }
}
