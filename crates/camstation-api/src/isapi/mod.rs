// ISAPI HTTP client
//
// Wraps `reqwest::Client` with ISAPI URL construction, basic auth and
// XML decoding. Every request carries the device credentials; ISAPI has
// no session cookie to keep alive.

pub mod models;

use secrecy::ExposeSecret;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::auth::Credentials;
use crate::error::Error;
use crate::transport::TransportConfig;

use self::models::{
    ChannelInfo, DeviceInfo, DeviceStatus, InputProxyChannelList, PtzData, PtzPreset,
    ResponseStatus, StreamingChannelList, UserCheck,
};

/// Raw HTTP client for a single ISAPI device (camera or NVR).
pub struct IsapiClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
}

impl std::fmt::Debug for IsapiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsapiClient")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.credentials.username)
            .finish_non_exhaustive()
    }
}

impl IsapiClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// `base_url` is the device root, e.g. `http://192.168.1.64:80`.
    pub fn new(
        base_url: Url,
        credentials: Credentials,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, credentials))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url, credentials: Credentials) -> Self {
        Self {
            http,
            base_url,
            credentials,
        }
    }

    /// The device base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── Endpoints ────────────────────────────────────────────────────

    /// Verify the credentials against `/ISAPI/Security/userCheck`.
    ///
    /// Some firmwares answer HTTP 200 with `statusValue` 401 instead of
    /// a proper status code; both are reported as `Error::Authentication`.
    pub async fn user_check(&self) -> Result<(), Error> {
        let body = self.get_text("/ISAPI/Security/userCheck").await?;
        if let Ok(check) = quick_xml::de::from_str::<UserCheck>(&body) {
            if let Some(status) = check.status_value {
                if status == 401 || status == 403 {
                    return Err(Error::Authentication {
                        message: check
                            .status_string
                            .unwrap_or_else(|| "credentials rejected".into()),
                    });
                }
            }
        }
        Ok(())
    }

    /// Lightweight liveness probe: `GET /ISAPI/System/status`.
    pub async fn device_status(&self) -> Result<DeviceStatus, Error> {
        self.get_xml("/ISAPI/System/status").await
    }

    /// `GET /ISAPI/System/deviceInfo`.
    pub async fn device_info(&self) -> Result<DeviceInfo, Error> {
        self.get_xml("/ISAPI/System/deviceInfo").await
    }

    /// Discover camera channels.
    ///
    /// Reads the streaming track list and keeps only main-stream tracks
    /// (`XX01`). On NVRs the InputProxy list supplies friendlier names; a
    /// 404 there just means the device is a standalone camera.
    pub async fn streaming_channels(&self) -> Result<Vec<ChannelInfo>, Error> {
        let list: StreamingChannelList = self.get_xml("/ISAPI/Streaming/channels").await?;

        let proxies = match self
            .get_xml::<InputProxyChannelList>("/ISAPI/ContentMgmt/InputProxy/channels")
            .await
        {
            Ok(list) => list.channels,
            Err(e) if e.is_not_found() => {
                trace!("no InputProxy channels (not an NVR)");
                Vec::new()
            }
            Err(e) => return Err(e),
        };

        let mut channels: Vec<ChannelInfo> = list
            .channels
            .iter()
            .filter_map(|track| {
                let (channel, stream) = track.channel_and_stream()?;
                if stream != 1 {
                    return None;
                }
                let proxy_name = proxies
                    .iter()
                    .find(|p| p.id == channel)
                    .and_then(|p| p.name.clone());
                let name = proxy_name
                    .or_else(|| track.channel_name.clone())
                    .unwrap_or_else(|| format!("Camera {channel}"));
                Some(ChannelInfo {
                    channel,
                    name,
                    enabled: track.enabled.unwrap_or(true),
                })
            })
            .collect();

        channels.sort_by_key(|c| c.channel);
        channels.dedup_by_key(|c| c.channel);
        Ok(channels)
    }

    /// Start (or with all zeros, stop) continuous PTZ movement.
    ///
    /// Speeds are in the ISAPI range `-100..=100`.
    pub async fn ptz_continuous(
        &self,
        channel: u32,
        pan: i8,
        tilt: i8,
        zoom: i8,
    ) -> Result<(), Error> {
        let body = PtzData { pan, tilt, zoom };
        self.put_xml(&format!("/ISAPI/PTZCtrl/channels/{channel}/continuous"), &body)
            .await
    }

    /// Stop any continuous PTZ movement on a channel.
    pub async fn ptz_stop(&self, channel: u32) -> Result<(), Error> {
        self.ptz_continuous(channel, 0, 0, 0).await
    }

    /// Move to a stored preset.
    pub async fn ptz_goto_preset(&self, channel: u32, preset: u32) -> Result<(), Error> {
        let body = PtzPreset { id: preset };
        self.put_xml(
            &format!("/ISAPI/PTZCtrl/channels/{channel}/presets/{preset}/goto"),
            &body,
        )
        .await
    }

    // ── Request helpers ──────────────────────────────────────────────

    fn isapi_url(&self, path: &str) -> Result<Url, Error> {
        Ok(self.base_url.join(path)?)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder.basic_auth(
            &self.credentials.username,
            Some(self.credentials.password.expose_secret()),
        )
    }

    async fn get_text(&self, path: &str) -> Result<String, Error> {
        let url = self.isapi_url(path)?;
        debug!("GET {}", url);
        let resp = self.authed(self.http.get(url)).send().await?;
        let resp = check_status(resp).await?;
        Ok(resp.text().await?)
    }

    async fn get_xml<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let body = self.get_text(path).await?;
        quick_xml::de::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(200).collect();
            Error::Deserialization {
                message: format!("{e} (body preview: {preview:?})"),
                body: body.clone(),
            }
        })
    }

    async fn put_xml(&self, path: &str, body: &impl Serialize) -> Result<(), Error> {
        let url = self.isapi_url(path)?;
        let xml = quick_xml::se::to_string(body).map_err(|e| Error::Deserialization {
            message: format!("failed to encode request body: {e}"),
            body: String::new(),
        })?;
        debug!("PUT {}", url);
        let resp = self
            .authed(self.http.put(url))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml)
            .send()
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

/// Map non-2xx responses to typed errors, passing success through.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, Error> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(Error::Authentication {
            message: format!("device rejected credentials (HTTP {})", status.as_u16()),
        });
    }

    let body = resp.text().await.unwrap_or_default();
    let message = quick_xml::de::from_str::<ResponseStatus>(&body)
        .ok()
        .and_then(|s| match (s.status_string, s.sub_status_code) {
            (Some(msg), Some(sub)) => Some(format!("{msg} ({sub})")),
            (Some(msg), None) => Some(msg),
            (None, sub) => sub,
        })
        .unwrap_or_else(|| body.chars().take(200).collect());

    Err(Error::Isapi {
        status: status.as_u16(),
        message,
    })
}
