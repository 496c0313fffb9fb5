mod support;

use std::sync::Arc;
use std::time::Duration;

use webrtc_room_client::media::{MediaConstraints, MediaKind};
use webrtc_room_client::{Client, ClientConfig, Error};

use support::{FakeDevices, FakeFactory};

fn client() -> Client {
    Client::new(
        ClientConfig::new("ws://rooms.test"),
        Arc::new(FakeFactory::default()),
        Arc::new(FakeDevices::default()),
    )
}

#[tokio::test]
async fn devices_are_grouped_by_kind() {
    let devices = client().get_devices().await.unwrap();

    let ids = |list: &[webrtc_room_client::media::DeviceInfo]| {
        list.iter().map(|d| d.device_id.clone()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&devices.audio_inputs), vec!["mic-1", "mic-2"]);
    assert_eq!(ids(&devices.video_inputs), vec!["cam-1"]);
    assert_eq!(ids(&devices.audio_outputs), vec!["speakers"]);
}

#[tokio::test]
async fn get_media_captures_from_the_requested_device() {
    let stream = client()
        .get_media(MediaConstraints::video_device("front"))
        .await
        .unwrap();

    assert!(stream.first_track(MediaKind::Audio).is_none());
    assert_eq!(
        stream.first_track(MediaKind::Video).unwrap().id(),
        "cam-front"
    );
}

#[tokio::test]
async fn connect_fails_without_a_server() {
    let client = Client::new(
        ClientConfig::new("ws://127.0.0.1:1"),
        Arc::new(FakeFactory::default()),
        Arc::new(FakeDevices::default()),
    );
    assert!(client.connect().await.is_err());
}

#[tokio::test]
async fn connect_rejects_a_zero_audio_level_interval() {
    let mut config = ClientConfig::new("ws://127.0.0.1:1");
    config.audio_level_interval = Duration::ZERO;

    let client = Client::new(
        config.clone(),
        Arc::new(FakeFactory::default()),
        Arc::new(FakeDevices::default()),
    );
    assert!(matches!(client.connect().await, Err(Error::Config(_))));
    assert!(matches!(
        Client::with_webrtc(config, Arc::new(FakeDevices::default())),
        Err(Error::Config(_))
    ));
}
