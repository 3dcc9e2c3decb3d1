//! Engine-level behavior: framing violations, flood limits, lifecycle

use std::io::Write;
use std::time::{Duration, Instant};

use mmocore::{FloodFilter, MmoConfig};
use mmocore_integration_tests::*;

#[test]
fn test_unknown_opcode_closes_the_connection() {
    let server = start_server(MmoConfig::default()).unwrap();
    let mut client = connect(server.local_addr()).unwrap();

    write_frame(&mut client, &[0xEE]).unwrap();
    expect_closed(&mut client).unwrap();
    server.shutdown();
}

#[test]
fn test_zero_length_frame_closes_the_connection() {
    let server = start_server(MmoConfig::default()).unwrap();
    let mut client = connect(server.local_addr()).unwrap();

    client.write_all(&[0x00, 0x00]).unwrap();
    expect_closed(&mut client).unwrap();
    server.shutdown();
}

#[test]
fn test_oversized_frame_closes_the_connection() {
    let mut config = MmoConfig::default();
    config.max_frame_size = 16;
    let server = start_server(config).unwrap();
    let mut client = connect(server.local_addr()).unwrap();

    // declared length 100 with a 16 byte limit; no payload needed,
    // the prefix alone is the violation
    client.write_all(&100u16.to_le_bytes()).unwrap();
    expect_closed(&mut client).unwrap();
    server.shutdown();
}

#[test]
fn test_truncated_packet_closes_the_connection() {
    let server = start_server(MmoConfig::default()).unwrap();
    let mut client = connect(server.local_addr()).unwrap();

    // ping carries 8 payload bytes, this frame has 1
    write_frame(&mut client, &[0x00, 0x42]).unwrap();
    expect_closed(&mut client).unwrap();
    server.shutdown();
}

#[test]
fn test_flooding_client_is_disconnected() {
    let mut config = MmoConfig::default();
    config.flood_tick_ms = 1_000;
    config.flood_filters = vec![FloodFilter {
        warn_limit: 3,
        reject_limit: 6,
        window: 2,
    }];
    let server = start_server(config).unwrap();
    let mut client = connect(server.local_addr()).unwrap();

    // well past the reject limit inside one tick
    for i in 0..20 {
        if write_frame(&mut client, &ping(i)).is_err() {
            break;
        }
    }
    let deadline = Instant::now() + Duration::from_secs(2);
    loop {
        match read_frame(&mut client) {
            Ok(_) => assert!(Instant::now() < deadline, "server kept answering a flooder"),
            Err(_) => break,
        }
    }
    server.shutdown();
}

#[test]
fn test_connection_count_tracks_connects_and_disconnects() {
    let server = start_server(MmoConfig::default()).unwrap();

    let mut a = connect(server.local_addr()).unwrap();
    let mut b = connect(server.local_addr()).unwrap();
    // a round trip guarantees both connections were adopted
    write_frame(&mut a, &ping(1)).unwrap();
    read_frame(&mut a).unwrap();
    write_frame(&mut b, &ping(2)).unwrap();
    read_frame(&mut b).unwrap();
    assert_eq!(server.connection_count(), 2);

    write_frame(&mut a, &quit()).unwrap();
    read_frame(&mut a).unwrap();
    expect_closed(&mut a).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.connection_count() != 1 {
        assert!(Instant::now() < deadline, "closed connection never left the registry");
        std::thread::sleep(Duration::from_millis(5));
    }
    server.shutdown();
}

#[test]
fn test_shutdown_closes_live_connections_and_returns() {
    let server = start_server(MmoConfig::default()).unwrap();
    let mut client = connect(server.local_addr()).unwrap();
    write_frame(&mut client, &ping(9)).unwrap();
    read_frame(&mut client).unwrap();

    server.shutdown();
    assert_eq!(server.connection_count(), 0);
    expect_closed(&mut client).unwrap();
}
