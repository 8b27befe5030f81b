// HTTP client construction for device control planes.
//
// One `TransportConfig` per station; each `IsapiClient` builds its own
// `reqwest::Client` from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Error;

const USER_AGENT: &str = concat!("camstation/", env!("CARGO_PKG_VERSION"));

/// How HTTPS device certificates are checked.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    System,
    /// Trust the PEM bundle at this path in addition to the system roots.
    CustomCa(PathBuf),
    /// Skip verification. Factory NVR firmware only has self-signed certs.
    #[default]
    DangerAcceptInvalid,
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub connect_timeout: Duration,
    /// Covers the whole request, connect included.
    pub request_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::default(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl TransportConfig {
    pub fn build_client(&self) -> Result<reqwest::Client, Error> {
        let builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout);
        let builder = match &self.tls {
            TlsMode::System => builder,
            TlsMode::CustomCa(path) => builder.add_root_certificate(load_ca(path)?),
            TlsMode::DangerAcceptInvalid => builder.danger_accept_invalid_certs(true),
        };
        builder
            .build()
            .map_err(|e| Error::Tls(format!("cannot build client: {e}")))
    }

    /// Whole seconds, as reported in `Error::Timeout`.
    pub fn request_timeout_secs(&self) -> u64 {
        self.request_timeout.as_secs()
    }
}

fn load_ca(path: &Path) -> Result<reqwest::Certificate, Error> {
    let pem = std::fs::read(path)
        .map_err(|e| Error::Tls(format!("{}: {e}", path.display())))?;
    reqwest::Certificate::from_pem(&pem)
        .map_err(|e| Error::Tls(format!("{} is not a PEM certificate: {e}", path.display())))
}
