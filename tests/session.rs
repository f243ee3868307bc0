use std::sync::{Arc, Mutex};
use std::time::Duration;

use gripread::bearer::{Advertisement, ManufacturerData, Peripheral};
use gripread::device::{ids, DeviceKind, ENTRALPI, MOTHERBOARD, PROGRESSOR};
use gripread::mock::{MockBearer, MockCharacteristic, MockPeripheral, MockService};
use gripread::{
    Error, Measurement, Notification, NotificationValue, ReadValue, Session, SessionConfig,
    ADVERTISEMENT_SOURCE,
};
use uuid::Uuid;

type Received = Arc<Mutex<Vec<Notification>>>;

fn characteristic_uuid(
    device: &gripread::device::DeviceDescriptor,
    service: &str,
    characteristic: &str,
) -> Uuid {
    device
        .service(service)
        .unwrap()
        .characteristics
        .iter()
        .find(|c| c.id == characteristic)
        .unwrap()
        .uuid
}

fn setup(
    peripheral: MockPeripheral,
    config: SessionConfig,
) -> (Session<Arc<MockBearer>>, Arc<MockPeripheral>, Received) {
    let peripheral = Arc::new(peripheral);
    let bearer = Arc::new(MockBearer::new().with_peripheral(peripheral.clone()));
    let session = Session::with_config(bearer, config);
    let received: Received = Arc::default();
    let sink = received.clone();
    session.notify(move |n| sink.lock().unwrap().push(n));
    (session, peripheral, received)
}

fn quick() -> SessionConfig {
    SessionConfig {
        settle_delay_ms: 0,
        ..Default::default()
    }
}

/// Let the pump tasks catch up
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

fn packet_line(samples: [i32; 3]) -> String {
    let mut bytes = vec![0x01, 0x00, 0x10, 0x0e];
    for s in samples {
        bytes.extend_from_slice(&s.to_le_bytes()[..3]);
    }
    bytes.extend_from_slice(&[0, 0, 0]);
    format!("{}\n", hex::encode(bytes))
}

fn calibration_dump() -> String {
    (0..3)
        .map(|channel| format!("{channel},0,100,0\n{channel},1,500,80\n"))
        .collect()
}

fn measurements(received: &Received) -> Vec<Measurement> {
    received
        .lock()
        .unwrap()
        .iter()
        .filter_map(|n| n.measurement().cloned())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_motherboard_calibrate_and_stream() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::RX))
        .unwrap();
    let tx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::TX))
        .unwrap();

    session.connect(DeviceKind::Motherboard).await.unwrap();
    session.calibration().await.unwrap();
    assert_eq!(tx.writes(), vec![b"C".to_vec()]);

    // The dump arrives split at arbitrary points
    let dump = calibration_dump();
    for chunk in dump.as_bytes().chunks(7) {
        rx.emit(chunk);
    }
    settle().await;
    let table = session.calibration_table();
    assert!(table.is_calibrated(3));
    assert_eq!(table.points(1).len(), 2);
    assert_eq!(received.lock().unwrap().len(), 6);

    session.stream(None).await.unwrap();
    assert_eq!(tx.writes().last().unwrap(), b"S30");

    rx.emit(packet_line([300, 400, 100]).as_bytes());
    settle().await;
    assert_eq!(
        measurements(&received),
        vec![Measurement {
            mass_total: 100.0,
            mass_left: Some(40.0),
            mass_right: Some(0.0),
            mass_centre: Some(60.0),
            ..Default::default()
        }]
    );
    let last = received.lock().unwrap().last().unwrap().clone();
    assert_eq!(last.source, rx_source(&MOTHERBOARD, ids::UART));

    session.stop().await.unwrap();
    assert_eq!(tx.writes().last().unwrap(), b"");
}

fn rx_source(device: &gripread::device::DeviceDescriptor, service: &str) -> String {
    characteristic_uuid(device, service, ids::RX).to_string()
}

#[tokio::test(start_paused = true)]
async fn test_stream_requires_calibration() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    let tx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::TX))
        .unwrap();
    session.connect(DeviceKind::Motherboard).await.unwrap();

    let err = session.stream(None).await.unwrap_err();
    assert!(matches!(err, Error::UncalibratedChannel { channel: 0 }));
    assert!(tx.writes().is_empty());
    assert!(received.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_negative_readings_are_clamped() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::RX))
        .unwrap();
    session.connect(DeviceKind::Motherboard).await.unwrap();

    for channel in 0..3 {
        rx.emit(format!("{channel},0,0,0\n{channel},1,1000,5000\n").as_bytes());
    }
    rx.emit(packet_line([-600, -700, -800]).as_bytes());
    settle().await;

    let measurements = measurements(&received);
    let json = serde_json::to_value(&measurements[0]).unwrap();
    for field in ["massTotal", "massLeft", "massRight", "massCentre"] {
        assert_eq!(json[field], "-1000.000", "{field}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_second_connect_is_rejected() {
    let (session, peripheral, _) = setup(MockPeripheral::from_kind(DeviceKind::Entralpi), quick());
    session.connect(DeviceKind::Entralpi).await.unwrap();

    let err = session.connect(DeviceKind::Entralpi).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected));
    let err = session.connect(DeviceKind::Motherboard).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected));

    assert!(session.is_connected());
    assert_eq!(session.device(), Some(DeviceKind::Entralpi));
    assert_eq!(peripheral.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_entralpi_weight() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Entralpi), SessionConfig::default());
    let rx = peripheral
        .characteristic(characteristic_uuid(&ENTRALPI, ids::UART, ids::RX))
        .unwrap();
    session.connect(DeviceKind::Entralpi).await.unwrap();

    rx.emit(&800u16.to_le_bytes());
    settle().await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].source, "0000fff4-0000-1000-8000-00805f9b34fb");
    assert_eq!(received[0].measurement().unwrap().mass_total, 8.00);
}

#[tokio::test(start_paused = true)]
async fn test_notification_error_keeps_stream_alive() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Entralpi), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&ENTRALPI, ids::UART, ids::RX))
        .unwrap();
    session.connect(DeviceKind::Entralpi).await.unwrap();

    rx.fail("transient gatt error");
    rx.emit(&800u16.to_le_bytes());
    settle().await;

    assert!(session.is_connected());
    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].measurement().unwrap().mass_total, 8.00);
}

#[tokio::test(start_paused = true)]
async fn test_set_tare_baseline() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Entralpi), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&ENTRALPI, ids::UART, ids::RX))
        .unwrap();
    assert!(matches!(session.set_tare(2.0), Err(Error::NotConnected)));
    session.connect(DeviceKind::Entralpi).await.unwrap();

    session.set_tare(2.0).unwrap();
    rx.emit(&800u16.to_le_bytes());
    settle().await;
    assert_eq!(
        received.lock().unwrap()[0].measurement().unwrap().mass_total,
        6.00
    );

    let (session, _, _) = setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    session.connect(DeviceKind::Motherboard).await.unwrap();
    assert!(matches!(
        session.set_tare(2.0),
        Err(Error::Unsupported {
            operation: "set_tare",
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_missing_characteristic() {
    let battery = MOTHERBOARD.service(ids::BATTERY).unwrap().uuid;
    let peripheral = MockPeripheral::from_kind(DeviceKind::Motherboard)
        .without_service(battery)
        .with_service(MockService::new(battery, Vec::new()));
    let (session, _, _) = setup(peripheral, quick());

    session.connect(DeviceKind::Motherboard).await.unwrap();
    let err = session.battery().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "characteristic battery.level was not resolved during connect"
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_services() {
    let (session, peripheral, _) = setup(MockPeripheral::new(Some("ENTRALPI"), None), quick());
    let err = session.connect(DeviceKind::Entralpi).await.unwrap_err();
    assert!(matches!(err, Error::NoServices));
    assert!(!session.is_connected());
    assert!(!peripheral.is_connected().await);
}

#[tokio::test(start_paused = true)]
async fn test_device_side_disconnect() {
    let (session, peripheral, _) =
        setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::RX))
        .unwrap();
    session.connect(DeviceKind::Motherboard).await.unwrap();
    rx.emit(calibration_dump().as_bytes());
    settle().await;
    assert!(!session.calibration_table().is_empty());

    peripheral.simulate_disconnect();
    settle().await;
    assert!(!session.is_connected());
    assert!(session.calibration_table().is_empty());
    assert!(matches!(session.stop().await, Err(Error::NotConnected)));

    session.connect(DeviceKind::Motherboard).await.unwrap();
    assert!(session.is_connected());
    assert_eq!(peripheral.connects(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_calibration_retained_across_disconnect() {
    let config = SessionConfig {
        retain_calibration: true,
        ..quick()
    };
    let (session, peripheral, _) = setup(MockPeripheral::from_kind(DeviceKind::Motherboard), config);
    let rx = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::UART, ids::RX))
        .unwrap();
    session.connect(DeviceKind::Motherboard).await.unwrap();
    rx.emit(calibration_dump().as_bytes());
    settle().await;

    session.disconnect().await.unwrap();
    assert!(session.calibration_table().is_calibrated(3));
    session.reset_calibration();
    assert!(session.calibration_table().is_empty());
}

fn wh_c06_advertisement(centi_kg: u16) -> Advertisement {
    let mut data = vec![0; 12];
    data[10..12].copy_from_slice(&centi_kg.to_be_bytes());
    Advertisement {
        local_name: Some("IF_B7".to_string()),
        manufacturer_data: Some(ManufacturerData {
            company_id: 0x0100,
            data,
        }),
        rssi: Some(-70),
    }
}

#[tokio::test(start_paused = true)]
async fn test_wh_c06_advertisements_and_liveness() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::WhC06), quick());
    session.connect(DeviceKind::WhC06).await.unwrap();
    assert_eq!(peripheral.connects(), 0);

    peripheral.advertise(wh_c06_advertisement(1250));
    peripheral.advertise(wh_c06_advertisement(750));
    settle().await;
    {
        let received = received.lock().unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[1].source, ADVERTISEMENT_SOURCE);
        let m = received[1].measurement().unwrap();
        assert_eq!(m.mass_total, 7.5);
        assert_eq!(m.mass_max, Some(12.5));
        assert_eq!(m.mass_average, Some(10.0));
    }

    // Each advertisement re-arms the window
    tokio::time::sleep(Duration::from_secs(9)).await;
    peripheral.advertise(wh_c06_advertisement(750));
    tokio::time::sleep(Duration::from_secs(9)).await;
    assert!(session.is_connected());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!session.is_connected());
}

#[tokio::test(start_paused = true)]
async fn test_wh_c06_stops_advertising() {
    let (session, peripheral, _) = setup(MockPeripheral::from_kind(DeviceKind::WhC06), quick());
    session.connect(DeviceKind::WhC06).await.unwrap();
    peripheral.go_silent();
    settle().await;
    assert!(!session.is_connected());
    session.connect(DeviceKind::WhC06).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_progressor_commands() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::Progressor), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(&PROGRESSOR, ids::PROGRESSOR, ids::RX))
        .unwrap();
    let tx = peripheral
        .characteristic(characteristic_uuid(&PROGRESSOR, ids::PROGRESSOR, ids::TX))
        .unwrap();
    session.connect(DeviceKind::Progressor).await.unwrap();

    assert_eq!(session.battery().await.unwrap(), None);
    rx.emit(&[0x00, 0x04, 0x10, 0x0e, 0x00, 0x00]);
    settle().await;
    assert_eq!(
        received.lock().unwrap()[0].value,
        NotificationValue::Response(ReadValue::Millivolts(3600))
    );

    session.tare().await.unwrap();
    session.stream(Some(Duration::from_secs(5))).await.unwrap();
    assert_eq!(
        tx.writes(),
        vec![vec![0x6f], vec![0x64], vec![0x65], vec![0x66]]
    );

    let mut frame = vec![0x01, 0x08];
    frame.extend_from_slice(&12.5f32.to_le_bytes());
    frame.extend_from_slice(&1_000u32.to_le_bytes());
    rx.emit(&frame);
    settle().await;
    assert_eq!(measurements(&received)[0].mass_total, 12.5);
}

#[tokio::test(start_paused = true)]
async fn test_unsupported_and_disconnected_commands() {
    let (session, _, _) = setup(MockPeripheral::from_kind(DeviceKind::Motherboard), quick());
    assert!(matches!(session.tare().await, Err(Error::NotConnected)));
    assert!(matches!(session.stream(None).await, Err(Error::NotConnected)));

    session.connect(DeviceKind::Motherboard).await.unwrap();
    let err = session.tare().await.unwrap_err();
    assert_eq!(err.to_string(), "tare is not supported by Motherboard");
}

#[tokio::test(start_paused = true)]
async fn test_device_information_reads() {
    let peripheral = MockPeripheral::from_kind(DeviceKind::Motherboard);
    let level = peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::BATTERY, ids::LEVEL))
        .unwrap();
    level.set_value(&[76]);
    peripheral
        .characteristic(characteristic_uuid(&MOTHERBOARD, ids::DEVICE, ids::MANUFACTURER))
        .unwrap()
        .set_value(b"Griptonite");
    let (session, _, _) = setup(peripheral, quick());
    session.connect(DeviceKind::Motherboard).await.unwrap();

    assert_eq!(session.battery().await.unwrap(), Some(ReadValue::Percent(76)));
    assert_eq!(
        session.manufacturer().await.unwrap(),
        ReadValue::Text("Griptonite".to_string())
    );
    assert!(matches!(
        session.serial().await,
        Err(Error::CharacteristicUnresolved { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_force_board_passthrough() {
    let (session, peripheral, received) =
        setup(MockPeripheral::from_kind(DeviceKind::ForceBoard), quick());
    let rx = peripheral
        .characteristic(characteristic_uuid(
            &gripread::device::FORCE_BOARD,
            "force",
            ids::RX,
        ))
        .unwrap();
    session.connect(DeviceKind::ForceBoard).await.unwrap();
    session.stream(None).await.unwrap();

    rx.emit(&[0x01, 0xff]);
    settle().await;
    assert_eq!(
        received.lock().unwrap()[0].value,
        NotificationValue::Raw(vec![0x01, 0xff])
    );
}

#[test]
fn test_mock_characteristic_records_writes() {
    let characteristic = MockCharacteristic::new(Uuid::nil());
    assert!(characteristic.writes().is_empty());
    assert!(!characteristic.is_subscribed());
}
