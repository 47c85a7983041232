mod common;

use bmslog_lib::discovery::{discover, probe};
use bmslog_lib::protocol::{Command, RequestFrame};
use bmslog_lib::transport::CandidatePorts;
use bmslog_lib::Error;
use common::{frame, frame_from, ScriptedConnector, ScriptedTransport};
use std::time::Duration;

fn soc_reply() -> Vec<u8> {
    frame(Command::Soc, [0x02, 0x0b, 0, 0, 0x75, 0x30, 0x03, 0xe8])
}

#[test]
fn first_answering_port_wins() {
    let ports = CandidatePorts::new("COM", 1..=8);
    let mut connector = ScriptedConnector::default();
    // COM1 and COM3 stay silent, COM2 and COM4 answer with something that is not the BMS
    connector.scripts.insert(
        "COM2".into(),
        vec![Some(frame_from(0x02, Command::Soc.code(), [0; 8]))],
    );
    connector.scripts.insert(
        "COM4".into(),
        vec![Some(frame(Command::Status, [0; 8]))],
    );
    connector.scripts.insert("COM5".into(), vec![Some(soc_reply())]);
    connector.scripts.insert("COM6".into(), vec![Some(soc_reply())]);

    let discovered = discover(&mut connector, ports.iter(), Duration::ZERO).unwrap();

    assert_eq!(discovered.identifier, "COM5");
    assert_eq!(discovered.device_address, 0x01);
    assert_eq!(connector.opened, vec!["COM1", "COM2", "COM3", "COM4", "COM5"]);
    for rejected in ["COM1", "COM2", "COM3", "COM4"] {
        assert_eq!(connector.closed_count(rejected), 1, "{rejected}");
    }
    assert_eq!(connector.closed_count("COM5"), 0);

    let writes = discovered.transport.writes.clone();
    assert_eq!(writes.borrow().as_slice(), &[RequestFrame::new(Command::Soc).to_vec()]);
    drop(discovered);
    assert_eq!(connector.closed_count("COM5"), 1);
}

#[test]
fn ports_that_cannot_be_opened_are_skipped() {
    let ports = CandidatePorts::new("COM", 1..=3);
    let mut connector = ScriptedConnector {
        unavailable: vec!["COM1".into(), "COM2".into()],
        ..ScriptedConnector::default()
    };
    connector.scripts.insert("COM3".into(), vec![Some(soc_reply())]);

    let discovered = discover(&mut connector, ports.iter(), Duration::ZERO).unwrap();

    assert_eq!(discovered.identifier, "COM3");
    assert_eq!(connector.opened, vec!["COM3"]);
    assert_eq!(connector.closed_count("COM1"), 0);
}

#[test]
fn exhausted_scan_closes_every_port() {
    let ports = CandidatePorts::new("/dev/ttyUSB", 0..=3);
    let mut connector = ScriptedConnector::default();
    connector.scripts.insert(
        "/dev/ttyUSB2".into(),
        vec![Some(vec![0xa5, 0x01, 0x90])],
    );

    let err = discover(&mut connector, ports.iter(), Duration::ZERO).unwrap_err();

    assert!(matches!(err, Error::DiscoveryExhausted { tried: 4 }), "{err}");
    for port in ports.iter() {
        assert_eq!(connector.closed_count(&port), 1, "{port}");
    }
}

#[test]
fn explicit_port_is_the_only_candidate() {
    let mut connector = ScriptedConnector {
        unavailable: vec!["/dev/ttyACM0".into()],
        ..ScriptedConnector::default()
    };
    let err = discover(
        &mut connector,
        ["/dev/ttyACM0".to_string()],
        Duration::ZERO,
    )
    .unwrap_err();
    assert!(matches!(err, Error::DiscoveryExhausted { tried: 1 }));
    assert!(connector.opened.is_empty());
}

#[test]
fn settle_delay_precedes_the_probe() {
    let mut connector = ScriptedConnector::default();
    connector.scripts.insert("COM1".into(), vec![Some(soc_reply())]);
    let settle = Duration::from_millis(30);
    let started = std::time::Instant::now();
    discover(&mut connector, ["COM1".to_string()], settle).unwrap();
    assert!(started.elapsed() >= settle);
}

#[test]
fn probe_checks_address_and_echo() {
    let mut transport = ScriptedTransport::new([soc_reply()]);
    assert_eq!(probe(&mut transport).unwrap(), 0x01);

    let mut transport = ScriptedTransport::new([frame(Command::Alarms, [0; 8])]);
    assert!(matches!(
        probe(&mut transport),
        Err(Error::UnexpectedCommand {
            expected: 0x90,
            received: 0x98
        })
    ));

    let mut transport =
        ScriptedTransport::new([frame_from(0x40, Command::Soc.code(), [0; 8])]);
    assert!(matches!(
        probe(&mut transport),
        Err(Error::UnexpectedAddress { .. })
    ));

    let mut transport = ScriptedTransport::new([]);
    assert!(matches!(probe(&mut transport), Err(Error::TransportTimeout)));
}
