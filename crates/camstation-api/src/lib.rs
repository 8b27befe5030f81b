// camstation-api: device control-plane clients.
//
// Speaks ISAPI over HTTP(S) to Hikvision-style cameras and NVRs. Media
// transport (RTSP) lives behind the decoder seam in camstation-core; this
// crate only handles authentication, health, discovery and PTZ.

pub mod auth;
pub mod error;
pub mod isapi;
pub mod transport;

pub use auth::{Credentials, DeviceProtocol};
pub use error::Error;
pub use isapi::IsapiClient;
pub use isapi::models::{ChannelInfo, DeviceInfo, DeviceStatus};
pub use transport::{TlsMode, TransportConfig};
