// ISAPI XML payloads.
//
// Only the fields the streaming core needs are modelled; quick-xml's serde
// layer skips everything else (attributes, namespaces, nested capability
// blocks) so firmware variations do not break decoding.

use serde::{Deserialize, Serialize};

/// `GET /ISAPI/System/deviceInfo`
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename = "DeviceInfo")]
pub struct DeviceInfo {
    #[serde(rename = "deviceName", default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(rename = "serialNumber", default)]
    pub serial_number: Option<String>,
    #[serde(rename = "macAddress", default)]
    pub mac_address: Option<String>,
    #[serde(rename = "firmwareVersion", default)]
    pub firmware_version: Option<String>,
    #[serde(rename = "deviceType", default)]
    pub device_type: Option<String>,
}

/// `GET /ISAPI/System/status`
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    #[serde(rename = "currentDeviceTime", default)]
    pub current_device_time: Option<String>,
    #[serde(rename = "deviceUpTime", default)]
    pub device_up_time: Option<u64>,
}

/// `GET /ISAPI/Security/userCheck`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct UserCheck {
    #[serde(rename = "statusValue", default)]
    pub status_value: Option<u16>,
    #[serde(rename = "statusString", default)]
    pub status_string: Option<String>,
}

/// Error body returned alongside non-2xx ISAPI statuses.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct ResponseStatus {
    #[serde(rename = "statusString", default)]
    pub status_string: Option<String>,
    #[serde(rename = "subStatusCode", default)]
    pub sub_status_code: Option<String>,
}

/// `GET /ISAPI/Streaming/channels`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct StreamingChannelList {
    #[serde(rename = "StreamingChannel", default)]
    pub channels: Vec<StreamingChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct StreamingChannel {
    pub id: String,
    #[serde(rename = "channelName", default)]
    pub channel_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// `GET /ISAPI/ContentMgmt/InputProxy/channels` (NVR only)
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct InputProxyChannelList {
    #[serde(rename = "InputProxyChannel", default)]
    pub channels: Vec<InputProxyChannel>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct InputProxyChannel {
    pub id: u32,
    #[serde(default)]
    pub name: Option<String>,
}

/// Body for `PUT /ISAPI/PTZCtrl/channels/{ch}/continuous`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename = "PTZData")]
pub(crate) struct PtzData {
    pub pan: i8,
    pub tilt: i8,
    pub zoom: i8,
}

/// Body for `PUT /ISAPI/PTZCtrl/channels/{ch}/presets/{id}/goto`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename = "PTZPreset")]
pub(crate) struct PtzPreset {
    pub id: u32,
}

/// A camera channel discovered on a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub channel: u32,
    pub name: String,
    pub enabled: bool,
}

impl StreamingChannel {
    /// Split an ISAPI track id (`XXYY`) into channel number and stream index.
    ///
    /// Ids of two digits or fewer are bare channel numbers on the main stream.
    pub(crate) fn channel_and_stream(&self) -> Option<(u32, u32)> {
        let id = self.id.trim();
        if id.len() > 2 {
            let (channel, stream) = id.split_at(id.len() - 2);
            Some((channel.parse().ok()?, stream.parse().ok()?))
        } else {
            Some((id.parse().ok()?, 1))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_device_info_ignores_unknown_fields() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <DeviceInfo version="2.0" xmlns="http://www.hikvision.com/ver20/XMLSchema">
                <deviceName>Lobby NVR</deviceName>
                <deviceID>abc</deviceID>
                <model>DS-7608NI</model>
                <serialNumber>DS-7608NI0120190101</serialNumber>
                <macAddress>aa:bb:cc:dd:ee:ff</macAddress>
                <firmwareVersion>V4.30.085</firmwareVersion>
                <deviceType>NVR</deviceType>
            </DeviceInfo>"#;
        let info: DeviceInfo = quick_xml::de::from_str(xml).unwrap();
        assert_eq!(info.device_name.as_deref(), Some("Lobby NVR"));
        assert_eq!(info.model.as_deref(), Some("DS-7608NI"));
        assert_eq!(info.device_type.as_deref(), Some("NVR"));
    }

    #[test]
    fn track_ids_split_into_channel_and_stream() {
        let ch = |id: &str| StreamingChannel {
            id: id.into(),
            channel_name: None,
            enabled: None,
        };
        assert_eq!(ch("101").channel_and_stream(), Some((1, 1)));
        assert_eq!(ch("1602").channel_and_stream(), Some((16, 2)));
        assert_eq!(ch("3").channel_and_stream(), Some((3, 1)));
        assert_eq!(ch("x01").channel_and_stream(), None);
    }

    #[test]
    fn ptz_body_serializes_as_isapi_xml() {
        let xml = quick_xml::se::to_string(&PtzData {
            pan: -50,
            tilt: 0,
            zoom: 10,
        })
        .unwrap();
        assert_eq!(xml, "<PTZData><pan>-50</pan><tilt>0</tilt><zoom>10</zoom></PTZData>");
    }
}
