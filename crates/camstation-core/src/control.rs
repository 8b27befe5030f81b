// ── Device control-plane seam ──
//
// The Connection Pool talks to devices only through `ControlPlane`, and
// resolves secrets only through `CredentialSource`. `IsapiControlPlane`
// is the production implementation on top of camstation-api.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use camstation_api::{
    ChannelInfo, Credentials, DeviceInfo, DeviceProtocol, IsapiClient, TransportConfig,
};

use crate::error::CoreError;
use crate::model::{CredentialsRef, DeviceIdentity};

/// Proof of a successful authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    pub established_at: DateTime<Utc>,
}

impl Session {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            established_at: Utc::now(),
        }
    }
}

/// A pan/tilt/zoom request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtzCommand {
    /// Continuous move; speeds in `-100..=100`.
    Move { pan: i8, tilt: i8, zoom: i8 },
    Stop,
    GotoPreset(u32),
}

/// Management API of a physical device.
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    async fn authenticate(
        &self,
        identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<Session, CoreError>;

    async fn probe_health(&self, identity: &DeviceIdentity) -> Result<(), CoreError>;

    /// Model, serial and firmware as the device reports them.
    async fn device_info(&self, identity: &DeviceIdentity) -> Result<DeviceInfo, CoreError>;

    async fn list_channels(&self, identity: &DeviceIdentity) -> Result<Vec<ChannelInfo>, CoreError>;

    async fn ptz_command(
        &self,
        identity: &DeviceIdentity,
        channel: u32,
        command: PtzCommand,
    ) -> Result<(), CoreError>;
}

/// Resolves a [`CredentialsRef`] to an actual secret.
#[async_trait]
pub trait CredentialSource: Send + Sync + 'static {
    async fn resolve(&self, reference: &CredentialsRef) -> Result<Credentials, CoreError>;
}

/// In-memory credentials, keyed by reference.
#[derive(Debug, Default, Clone)]
pub struct StaticCredentials {
    entries: HashMap<CredentialsRef, Credentials>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: impl Into<CredentialsRef>, credentials: Credentials) -> Self {
        self.entries.insert(reference.into(), credentials);
        self
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    async fn resolve(&self, reference: &CredentialsRef) -> Result<Credentials, CoreError> {
        self.entries
            .get(reference)
            .cloned()
            .ok_or_else(|| CoreError::AuthFailed {
                message: format!("no credentials stored for '{reference}'"),
            })
    }
}

// ── ISAPI implementation ─────────────────────────────────────────

/// [`ControlPlane`] backed by one [`IsapiClient`] per device identity.
///
/// RTSP-only devices have no management plane: authentication and probes
/// succeed without network traffic.
pub struct IsapiControlPlane {
    transport: TransportConfig,
    clients: DashMap<DeviceIdentity, Arc<IsapiClient>>,
}

impl IsapiControlPlane {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            transport,
            clients: DashMap::new(),
        }
    }

    fn client(&self, identity: &DeviceIdentity) -> Result<Arc<IsapiClient>, CoreError> {
        self.clients
            .get(identity)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| CoreError::ConnectFailed {
                target: identity.to_string(),
                reason: "no authenticated session".into(),
            })
    }

    fn unsupported(identity: &DeviceIdentity, operation: &str) -> CoreError {
        CoreError::Unsupported {
            operation: format!("{operation} on {} device {identity}", identity.protocol),
        }
    }
}

#[async_trait]
impl ControlPlane for IsapiControlPlane {
    async fn authenticate(
        &self,
        identity: &DeviceIdentity,
        credentials: &Credentials,
    ) -> Result<Session, CoreError> {
        if !identity.protocol.has_control_plane() {
            return Ok(Session::new("rtsp"));
        }
        let client = IsapiClient::new(
            identity.control_url()?,
            credentials.clone(),
            &self.transport,
        )?;
        client.user_check().await?;
        debug!(device = %identity, "ISAPI credentials accepted");
        self.clients.insert(identity.clone(), Arc::new(client));
        Ok(Session::new(format!("isapi:{}", credentials.username)))
    }

    async fn probe_health(&self, identity: &DeviceIdentity) -> Result<(), CoreError> {
        match identity.protocol {
            DeviceProtocol::Rtsp => Ok(()),
            DeviceProtocol::Isapi => {
                self.client(identity)?.device_status().await?;
                Ok(())
            }
        }
    }

    async fn device_info(&self, identity: &DeviceIdentity) -> Result<DeviceInfo, CoreError> {
        match identity.protocol {
            DeviceProtocol::Rtsp => Err(Self::unsupported(identity, "device info")),
            DeviceProtocol::Isapi => Ok(self.client(identity)?.device_info().await?),
        }
    }

    async fn list_channels(&self, identity: &DeviceIdentity) -> Result<Vec<ChannelInfo>, CoreError> {
        match identity.protocol {
            DeviceProtocol::Rtsp => Err(Self::unsupported(identity, "channel discovery")),
            DeviceProtocol::Isapi => Ok(self.client(identity)?.streaming_channels().await?),
        }
    }

    async fn ptz_command(
        &self,
        identity: &DeviceIdentity,
        channel: u32,
        command: PtzCommand,
    ) -> Result<(), CoreError> {
        if identity.protocol == DeviceProtocol::Rtsp {
            return Err(Self::unsupported(identity, "PTZ"));
        }
        let client = self.client(identity)?;
        match command {
            PtzCommand::Move { pan, tilt, zoom } => {
                client.ptz_continuous(channel, pan, tilt, zoom).await?;
            }
            PtzCommand::Stop => client.ptz_stop(channel).await?,
            PtzCommand::GotoPreset(preset) => client.ptz_goto_preset(channel, preset).await?,
        }
        Ok(())
    }
}
