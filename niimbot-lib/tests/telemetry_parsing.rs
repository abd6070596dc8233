//! Tests for heartbeat, RFID, print status and device info decoding

mod common;

use common::*;
use niimbot_lib::telemetry::{Compartment, DeviceStatus, InfoKey, PrintJobStatus, RfidRollState};

#[test]
fn test_heartbeat_len9() {
    let mut payload = vec![0u8; 9];
    payload[8] = 1;
    assert_eq!(
        DeviceStatus::from_heartbeat(&payload),
        DeviceStatus {
            battery: -1,
            paper: -1,
            closing: 1,
            rfid: -1
        }
    );
}

#[test]
fn test_heartbeat_layouts() {
    let payload: Vec<u8> = (0..20).collect();

    // (length, battery, paper, closing, rfid)
    let test_cases = vec![
        (20, -1, 18, -1, 19),
        (19, 16, 17, 15, 18),
        (13, 10, 11, 9, 12),
        (10, 9, -1, 8, 8),
        (9, -1, -1, 8, -1),
    ];

    for (len, battery, paper, closing, rfid) in test_cases {
        let status = DeviceStatus::from_heartbeat(&payload[..len]);
        assert_eq!(
            status,
            DeviceStatus {
                battery,
                paper,
                closing,
                rfid
            },
            "Heartbeat of length {}",
            len
        );
    }
}

#[test]
fn test_heartbeat_unknown_length() {
    for len in [0, 5, 11, 25] {
        assert_eq!(DeviceStatus::from_heartbeat(&vec![1; len]), DeviceStatus::UNKNOWN);
    }
}

#[test]
fn test_compartment() {
    let status = |closing| DeviceStatus {
        closing,
        ..DeviceStatus::UNKNOWN
    };
    assert_eq!(status(0).compartment(), Compartment::Open);
    assert_eq!(status(1).compartment(), Compartment::Closed);
    assert_eq!(status(-1).compartment(), Compartment::Unknown);
    assert_eq!(status(7).compartment(), Compartment::Other(7));
}

#[test]
fn test_rfid_roll_state() {
    let payload = rfid_payload(b"ABC", b"XY", 10, 5, 1);
    let roll = RfidRollState::parse(&payload).expect("roll present");

    assert_eq!(roll.uuid, "0102030405060708");
    assert_eq!(roll.barcode, "ABC");
    assert_eq!(roll.serial, "XY");
    assert_eq!(roll.used, 5);
    assert_eq!(roll.total, 10);
    assert_eq!(roll.roll_type, 1);
    assert_eq!(roll.remaining(), 5);
}

#[test]
fn test_rfid_no_roll() {
    let mut payload = rfid_payload(b"ABC", b"XY", 10, 5, 1);
    payload[0] = 0;
    assert!(RfidRollState::parse(&payload).is_none());
    assert!(RfidRollState::parse(&[]).is_none());
}

#[test]
fn test_rfid_truncated() {
    let payload = rfid_payload(b"6972842743589", b"PZ1G2034", 160, 3, 1);
    for len in 1..payload.len() {
        assert!(
            RfidRollState::parse(&payload[..len]).is_none(),
            "Truncated to {} bytes should not parse",
            len
        );
    }
    assert!(RfidRollState::parse(&payload).is_some());
}

#[test]
fn test_rfid_serializes_type_field() {
    let roll = RfidRollState::parse(&default_rfid()).unwrap();
    let json = serde_json::to_value(&roll).unwrap();
    assert_eq!(json["type"], 1);
    assert_eq!(json["total"], 160);
    assert_eq!(json["used"], 3);
}

#[test]
fn test_print_job_status() {
    let status = PrintJobStatus::parse(&[0x00, 0x02, 0x32, 0x64]).unwrap();
    assert_eq!(status.page, 2);
    assert_eq!(status.progress, [50, 100]);

    match PrintJobStatus::parse(&[0x00, 0x01, 0x00]) {
        Err(NiimError::InsufficientData { expected: 4, actual: 3 }) => {}
        other => panic!("Expected InsufficientData, got {:?}", other),
    }
}

#[test]
fn test_info_formatting() {
    let packet = |payload: Vec<u8>| Packet::new(0x40u8, payload).unwrap();

    assert_eq!(InfoKey::DeviceSerial.format(&packet(vec![0x0a, 0xbc])), "0ABC");
    assert_eq!(InfoKey::SoftwareVersion.format(&packet(vec![0x01, 0x2C])), "3");
    assert_eq!(InfoKey::HardwareVersion.format(&packet(vec![0x00, 0x63])), "0");
    assert_eq!(InfoKey::Battery.format(&packet(vec![0x04])), "4");
}
