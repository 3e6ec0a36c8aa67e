use std::sync::Arc;
use std::time::Duration;

use shuntread::mock::MockTransport;
use shuntread::{
    build_read_request, crc, spawn_device, ChannelSink, ConnectionState, DeviceProfile,
    DeviceSelector, DeviceSettings, EngineError, SinkEvent,
};
use tokio::sync::mpsc::UnboundedReceiver;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("shuntread=debug")
        .with_test_writer()
        .try_init();
}

fn with_crc(mut body: Vec<u8>) -> Vec<u8> {
    let crc = crc(&body);
    body.extend_from_slice(&crc);
    body
}

/// A read response with `data` placed at frame offsets.
fn read_response(slave_id: u8, word_count: u16, data: &[(usize, &[u8])]) -> Vec<u8> {
    let mut body = vec![0u8; word_count as usize * 2 + 3];
    body[0] = slave_id;
    body[1] = 0x03;
    body[2] = (word_count * 2) as u8;
    for (offset, bytes) in data {
        body[*offset..*offset + bytes.len()].copy_from_slice(bytes);
    }
    with_crc(body)
}

fn selector(alias: &str) -> DeviceSelector {
    DeviceSelector {
        mac: None,
        alias: Some(alias.to_owned()),
        adapter: "hci0".to_owned(),
        timeout: Duration::from_secs(5),
    }
}

fn single_shot(alias: &str, profile: DeviceProfile) -> DeviceSettings {
    let mut settings = DeviceSettings::new(selector(alias), profile);
    settings.timing.poll_interval = None;
    settings
}

fn events(rx: &mut UnboundedReceiver<SinkEvent>) -> Vec<SinkEvent> {
    let mut out = Vec::new();
    while let Ok(event) = rx.try_recv() {
        out.push(event);
    }
    out
}

fn rover_transport() -> MockTransport {
    let transport = MockTransport::new();
    transport
        .respond(
            &build_read_request(0xff, 26, 1),
            vec![read_response(0xff, 1, &[(4, &[0x10])])],
        )
        .respond(
            &build_read_request(0xff, 57348, 1),
            vec![read_response(0xff, 1, &[(4, &[0x02])])],
        );

    // the 73 byte charging block arrives as 20 byte notifications
    let charging = read_response(
        0xff,
        34,
        &[(3, &[0x00, 0x55]), (5, &[0x00, 0x83]), (21, &[0x00, 0x78])],
    );
    transport.respond(
        &build_read_request(0xff, 256, 34),
        charging.chunks(20).map(<[u8]>::to_vec).collect(),
    );
    transport
}

#[tokio::test(start_paused = true)]
async fn rover_cycle_end_to_end() {
    init_tracing();
    let transport = rover_transport();
    let (sink, mut rx) = ChannelSink::new();
    let handle = spawn_device(
        Arc::new(transport.clone()),
        single_shot("BT-TH-66A3C7A1", DeviceProfile::rover()),
        Arc::new(sink),
    );

    handle.join().await;

    let events = events(&mut rx);
    let [SinkEvent::Record(record)] = events.as_slice() else {
        panic!("unexpected events {events:?}");
    };
    assert_eq!(record.device, "BT-TH-66A3C7A1");
    assert_eq!(record.profile, "rover");
    assert_eq!(record.fields["device_address"], 16.0);
    assert_eq!(record.fields["battery_percentage"], 85.0);
    assert!((record.fields["battery_voltage"] - 13.1).abs() < 1e-9);
    assert_eq!(record.fields["pv_power"], 120.0);
    assert_eq!(record.fields["battery_type"], 2.0);
    assert_eq!(transport.writes().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn field_filter_applies_to_records() {
    let transport = rover_transport();
    let (sink, mut rx) = ChannelSink::new();
    let mut settings = single_shot("BT-TH-66A3C7A1", DeviceProfile::rover());
    settings.fields = vec!["pv_power".to_owned(), "battery_voltage".to_owned()];
    let handle = spawn_device(Arc::new(transport), settings, Arc::new(sink));

    handle.join().await;

    match events(&mut rx).as_slice() {
        [SinkEvent::Record(record)] => {
            let names: Vec<_> = record.fields.keys().map(String::as_str).collect();
            assert_eq!(names, vec!["battery_voltage", "pv_power"]);
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn bad_section_leaves_the_rest() {
    let transport = rover_transport();
    let mut corrupted = read_response(0xff, 34, &[(3, &[0x00, 0x55])]);
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xff;
    transport.respond(&build_read_request(0xff, 256, 34), vec![corrupted]);
    let (sink, mut rx) = ChannelSink::new();
    let handle = spawn_device(
        Arc::new(transport),
        single_shot("BT-TH-66A3C7A1", DeviceProfile::rover()),
        Arc::new(sink),
    );

    handle.join().await;

    match events(&mut rx).as_slice() {
        [SinkEvent::Record(record)] => {
            assert_eq!(record.fields.len(), 2);
            assert!(record.fields.contains_key("device_address"));
            assert!(record.fields.contains_key("battery_type"));
        }
        other => panic!("unexpected events {other:?}"),
    }
}

fn shunt_frame() -> Vec<u8> {
    let mut body = vec![0u8; 71];
    body[0] = 0xff;
    body[1] = 0x57;
    // 13.2 V, 1.5 A, 98.0 %
    body[25..28].copy_from_slice(&[0x00, 0x33, 0x90]);
    body[21..24].copy_from_slice(&[0x00, 0x05, 0xdc]);
    body[34..36].copy_from_slice(&[0x03, 0xd4]);
    with_crc(body)
}

#[tokio::test(start_paused = true)]
async fn shunt_frames_are_recovered_from_noise() {
    init_tracing();
    let transport = MockTransport::new();
    let (sink, mut rx) = ChannelSink::new();
    let handle = spawn_device(
        Arc::new(transport.clone()),
        single_shot("RMTShunt300A1B2", DeviceProfile::shunt()),
        Arc::new(sink),
    );
    let mut state = handle.subscribe_state();
    state
        .wait_for(|s| *s == ConnectionState::Polling)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let mut stream = vec![0x00, 0x57, 0x13, 0x37];
    stream.extend_from_slice(&shunt_frame());
    for chunk in stream.chunks(20) {
        assert!(transport.push(chunk.to_vec()));
    }
    handle.join().await;

    match events(&mut rx).as_slice() {
        [SinkEvent::Record(record)] => {
            assert_eq!(record.profile, "shunt");
            assert!((record.fields["charge_battery_voltage"] - 13.2).abs() < 1e-9);
            assert!((record.fields["discharge_amps"] - 1.5).abs() < 1e-9);
            assert!((record.fields["discharge_watts"] - 19.8).abs() < 1e-9);
            assert!((record.fields["state_of_charge"] - 98.0).abs() < 1e-9);
        }
        other => panic!("unexpected events {other:?}"),
    }
    assert!(transport.writes().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_is_reported_once() {
    let transport = MockTransport::new();
    transport.fail_connects(usize::MAX);
    let (sink, mut rx) = ChannelSink::new();
    let mut settings = single_shot("BT-TH-66A3C7A1", DeviceProfile::rover());
    settings.policy.max_reconnect_attempts = 4;
    let handle = spawn_device(Arc::new(transport.clone()), settings, Arc::new(sink));
    let state = handle.subscribe_state();

    handle.join().await;

    assert_eq!(transport.connect_attempts().len(), 4);
    assert_eq!(*state.borrow(), ConnectionState::Faulted);
    match events(&mut rx).as_slice() {
        [SinkEvent::Error { device, error }] => {
            assert_eq!(device, "BT-TH-66A3C7A1");
            assert!(matches!(
                error,
                EngineError::MaxReconnectAttemptsExceeded { attempts: 4, .. }
            ));
        }
        other => panic!("unexpected events {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn config_drives_the_engine() {
    let config: shuntread::Config = r#"
        [[devices]]
        alias = "BT-TH-66A3C7A1"
        enable_polling = false
        fields = ["battery_percentage"]
    "#
    .parse()
    .unwrap();
    let settings = config.device_settings().unwrap().remove(0);
    let (sink, mut rx) = ChannelSink::new();
    let handle = spawn_device(Arc::new(rover_transport()), settings, Arc::new(sink));

    handle.join().await;

    match events(&mut rx).as_slice() {
        [SinkEvent::Record(record)] => {
            assert_eq!(record.fields.len(), 1);
            assert_eq!(record.fields["battery_percentage"], 85.0);
        }
        other => panic!("unexpected events {other:?}"),
    }
}
