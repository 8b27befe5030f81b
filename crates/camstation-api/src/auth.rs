use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// Username/password pair for a camera or NVR.
///
/// Used both for control-plane HTTP auth and for RTSP media sessions.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }
}

/// The control-plane flavour a device speaks.
///
/// Determines how health is probed, how channels are discovered and
/// which RTSP paths carry the main and sub streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceProtocol {
    /// Hikvision ISAPI (NVRs and IP cameras) -- full control plane.
    #[default]
    Isapi,
    /// Generic RTSP camera -- no management connection at all.
    Rtsp,
}

impl std::fmt::Display for DeviceProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Isapi => "isapi",
            Self::Rtsp => "rtsp",
        })
    }
}

impl DeviceProtocol {
    /// Whether the device exposes an HTTP management plane.
    pub fn has_control_plane(self) -> bool {
        matches!(self, Self::Isapi)
    }

    /// The RTSP path for a channel's main or sub stream.
    ///
    /// ISAPI encodes the stream in the last two digits of the track id:
    /// `{channel}01` is the main stream, `{channel}02` the sub stream.
    /// Generic RTSP cameras have no convention; callers override per camera.
    pub fn stream_path(self, channel: u32, sub_stream: bool) -> String {
        match self {
            Self::Isapi => {
                let track = if sub_stream { "02" } else { "01" };
                format!("/Streaming/Channels/{channel}{track}")
            }
            Self::Rtsp => {
                if sub_stream {
                    "/stream2".into()
                } else {
                    "/stream1".into()
                }
            }
        }
    }

    /// The health-probe endpoint, if the protocol has one.
    pub fn status_path(self) -> Option<&'static str> {
        match self {
            Self::Isapi => Some("/ISAPI/System/status"),
            Self::Rtsp => None,
        }
    }
}
