#![allow(clippy::unwrap_used)]
// `IsapiControlPlane` against a mock NVR.

use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use camstation_core::{
    ControlPlane, CoreError, Credentials, CredentialsRef, DeviceIdentity, DeviceProtocol,
    IsapiControlPlane, PtzCommand, Transport, TransportConfig,
};

fn xml(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "application/xml")
        .set_body_string(body)
}

fn identity(server: &MockServer) -> DeviceIdentity {
    DeviceIdentity {
        host: server.address().ip().to_string(),
        port: server.address().port(),
        transport: Transport::Http,
        protocol: DeviceProtocol::Isapi,
        credentials: CredentialsRef::from("nvr"),
    }
}

async fn accept_user_check(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/ISAPI/Security/userCheck"))
        .respond_with(xml(
            "<userCheck><statusValue>200</statusValue><statusString>OK</statusString></userCheck>",
        ))
        .mount(server)
        .await;
}

#[tokio::test]
async fn authenticate_then_probe_and_list_channels() {
    let server = MockServer::start().await;
    accept_user_check(&server).await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/status"))
        .respond_with(xml(
            "<DeviceStatus><deviceUpTime>3600</deviceUpTime></DeviceStatus>",
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/Streaming/channels"))
        .respond_with(xml(
            r#"<StreamingChannelList version="2.0">
                <StreamingChannel><id>101</id><channelName>Gate</channelName><enabled>true</enabled></StreamingChannel>
                <StreamingChannel><id>102</id><channelName>Gate</channelName><enabled>true</enabled></StreamingChannel>
            </StreamingChannelList>"#,
        ))
        .mount(&server)
        .await;

    let plane = IsapiControlPlane::new(TransportConfig::default());
    let id = identity(&server);
    let session = plane
        .authenticate(&id, &Credentials::new("admin", "hunter22"))
        .await
        .unwrap();
    assert_eq!(session.token, "isapi:admin");

    plane.probe_health(&id).await.unwrap();
    let channels = plane.list_channels(&id).await.unwrap();
    assert_eq!(channels.len(), 1);
    assert_eq!(channels[0].channel, 1);
    assert_eq!(channels[0].name, "Gate");
}

#[tokio::test]
async fn rejected_credentials_map_to_auth_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/Security/userCheck"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let plane = IsapiControlPlane::new(TransportConfig::default());
    let err = plane
        .authenticate(&identity(&server), &Credentials::new("admin", "wrong"))
        .await
        .unwrap_err();
    assert!(err.is_auth_failure(), "got {err:?}");
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn failing_status_endpoint_is_retryable() {
    let server = MockServer::start().await;
    accept_user_check(&server).await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let plane = IsapiControlPlane::new(TransportConfig::default());
    let id = identity(&server);
    plane
        .authenticate(&id, &Credentials::new("admin", "hunter22"))
        .await
        .unwrap();
    let err = plane.probe_health(&id).await.unwrap_err();
    assert!(err.is_retryable(), "got {err:?}");
}

#[tokio::test]
async fn ptz_commands_hit_the_channel_endpoints() {
    let server = MockServer::start().await;
    accept_user_check(&server).await;
    Mock::given(method("PUT"))
        .and(path("/ISAPI/PTZCtrl/channels/3/continuous"))
        .and(body_string_contains("<pan>40</pan>"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/ISAPI/PTZCtrl/channels/3/presets/2/goto"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let plane = IsapiControlPlane::new(TransportConfig::default());
    let id = identity(&server);
    plane
        .authenticate(&id, &Credentials::new("admin", "hunter22"))
        .await
        .unwrap();
    plane
        .ptz_command(
            &id,
            3,
            PtzCommand::Move {
                pan: 40,
                tilt: 0,
                zoom: 0,
            },
        )
        .await
        .unwrap();
    plane
        .ptz_command(&id, 3, PtzCommand::GotoPreset(2))
        .await
        .unwrap();

    let rtsp = DeviceIdentity {
        protocol: DeviceProtocol::Rtsp,
        ..id
    };
    assert!(matches!(
        plane.ptz_command(&rtsp, 1, PtzCommand::Stop).await,
        Err(CoreError::Unsupported { .. })
    ));
}

#[tokio::test]
async fn device_info_reports_model_serial_and_firmware() {
    let server = MockServer::start().await;
    accept_user_check(&server).await;
    Mock::given(method("GET"))
        .and(path("/ISAPI/System/deviceInfo"))
        .respond_with(xml(
            r#"<DeviceInfo version="2.0" xmlns="http://www.hikvision.com/ver20/XMLSchema">
                <deviceName>Lobby NVR</deviceName>
                <model>DS-7608NI</model>
                <serialNumber>DS-7608NI0120190101</serialNumber>
                <firmwareVersion>V4.30.085</firmwareVersion>
            </DeviceInfo>"#,
        ))
        .expect(1)
        .mount(&server)
        .await;

    let plane = IsapiControlPlane::new(TransportConfig::default());
    let id = identity(&server);
    plane
        .authenticate(&id, &Credentials::new("admin", "hunter22"))
        .await
        .unwrap();

    let info = plane.device_info(&id).await.unwrap();
    assert_eq!(info.model.as_deref(), Some("DS-7608NI"));
    assert_eq!(info.serial_number.as_deref(), Some("DS-7608NI0120190101"));
    assert_eq!(info.firmware_version.as_deref(), Some("V4.30.085"));
}
