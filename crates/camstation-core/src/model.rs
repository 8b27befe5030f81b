// ── Domain model ──
//
// Identifiers, device and camera records, stream keys and decoded frames.
// Everything here is plain data: cheap to clone, safe to share.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use url::Url;

use camstation_api::DeviceProtocol;

use crate::error::CoreError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

string_id!(
    /// Stable identifier of a registered device (NVR or standalone camera).
    DeviceId
);
string_id!(
    /// Stable identifier of a camera channel.
    CameraId
);
string_id!(
    /// Identifies one consumer holding demand (a grid cell, an export job, a timeline).
    RequesterId
);
string_id!(
    /// Reference to a stored secret. Never the secret itself.
    CredentialsRef
);

impl Default for RequesterId {
    fn default() -> Self {
        Self("default".into())
    }
}

// ── Stream profile & priority ────────────────────────────────────

/// Sub (low bitrate) or main (full resolution) stream variant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StreamProfile {
    #[default]
    Sub,
    Main,
}

impl StreamProfile {
    pub fn is_sub(self) -> bool {
        matches!(self, Self::Sub)
    }
}

/// Demand priority. Lower values are evicted first and admitted last.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub const LOW: Self = Self(0);
    pub const NORMAL: Self = Self(50);
    pub const HIGH: Self = Self(100);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One stream handle exists per `(camera, profile)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub camera: CameraId,
    pub profile: StreamProfile,
}

impl StreamKey {
    pub fn new(camera: CameraId, profile: StreamProfile) -> Self {
        Self { camera, profile }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.camera, self.profile)
    }
}

// ── Device identity ──────────────────────────────────────────────

/// Control-plane scheme.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Transport {
    #[default]
    Http,
    Https,
}

/// What makes two records "the same physical device".
///
/// The Connection Pool is keyed by this; two devices with equal identities
/// share one control connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub protocol: DeviceProtocol,
    pub credentials: CredentialsRef,
}

impl DeviceIdentity {
    /// Base URL of the management plane, e.g. `http://10.0.0.5:80/`.
    pub fn control_url(&self) -> Result<Url, CoreError> {
        let raw = format!("{}://{}:{}/", self.transport, self.host, self.port);
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid device address {raw}: {e}"),
        })
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── Device & camera records ──────────────────────────────────────

pub const DEFAULT_RTSP_PORT: u16 = 554;

/// A registered NVR or standalone camera.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub identity: DeviceIdentity,
    #[serde(default = "default_rtsp_port")]
    pub rtsp_port: u16,
}

fn default_rtsp_port() -> u16 {
    DEFAULT_RTSP_PORT
}

impl Device {
    pub fn protocol(&self) -> DeviceProtocol {
        self.identity.protocol
    }
}

/// One camera channel on a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Camera {
    pub id: CameraId,
    pub device: DeviceId,
    pub channel: u32,
    pub name: String,
    #[serde(default)]
    pub preferred_profile: StreamProfile,
    /// RTSP path overrides, mostly for generic RTSP cameras.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

impl Camera {
    /// RTSP path for the given profile on the owning device.
    pub fn stream_path(&self, protocol: DeviceProtocol, profile: StreamProfile) -> String {
        let custom = match profile {
            StreamProfile::Main => self.main_path.as_deref(),
            StreamProfile::Sub => self.sub_path.as_deref(),
        };
        match custom {
            Some(path) if path.starts_with('/') => path.to_owned(),
            Some(path) => format!("/{path}"),
            None => protocol.stream_path(self.channel, profile.is_sub()),
        }
    }

    /// Media source URL. Credentials are never embedded.
    pub fn source_url(&self, device: &Device, profile: StreamProfile) -> Result<Url, CoreError> {
        let raw = format!(
            "rtsp://{}:{}{}",
            device.identity.host,
            device.rtsp_port,
            self.stream_path(device.protocol(), profile)
        );
        Url::parse(&raw).map_err(|e| CoreError::Config {
            message: format!("invalid stream source {raw}: {e}"),
        })
    }
}

// ── Frames ───────────────────────────────────────────────────────

/// A decoded picture.
///
/// `image` is opaque to the core; the decoder decides the pixel format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub image: Bytes,
    pub width: u32,
    pub height: u32,
    /// Presentation timestamp relative to stream start.
    pub pts: Duration,
    pub sequence: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn device(protocol: DeviceProtocol) -> Device {
        Device {
            id: DeviceId::from("nvr"),
            name: "NVR".into(),
            identity: DeviceIdentity {
                host: "10.0.0.5".into(),
                port: 80,
                transport: Transport::Http,
                protocol,
                credentials: CredentialsRef::from("nvr"),
            },
            rtsp_port: 554,
        }
    }

    fn camera() -> Camera {
        Camera {
            id: CameraId::from("front"),
            device: DeviceId::from("nvr"),
            channel: 3,
            name: "Front".into(),
            preferred_profile: StreamProfile::Sub,
            main_path: None,
            sub_path: None,
        }
    }

    #[test]
    fn isapi_source_url_uses_track_ids() {
        let url = camera()
            .source_url(&device(DeviceProtocol::Isapi), StreamProfile::Sub)
            .unwrap();
        assert_eq!(url.as_str(), "rtsp://10.0.0.5:554/Streaming/Channels/302");
    }

    #[test]
    fn path_override_wins_and_gets_leading_slash() {
        let mut cam = camera();
        cam.main_path = Some("live/main".into());
        let url = cam
            .source_url(&device(DeviceProtocol::Rtsp), StreamProfile::Main)
            .unwrap();
        assert_eq!(url.as_str(), "rtsp://10.0.0.5:554/live/main");
    }

    #[test]
    fn identity_equality_defines_same_device() {
        let a = device(DeviceProtocol::Isapi).identity;
        let mut b = a.clone();
        assert_eq!(a, b);
        b.port = 8080;
        assert_ne!(a, b);
    }

    #[test]
    fn profile_parses_from_lowercase() {
        assert_eq!("main".parse::<StreamProfile>().unwrap(), StreamProfile::Main);
        assert_eq!(StreamProfile::Sub.to_string(), "sub");
    }
}
