#![cfg(unix)]

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use synesthesia_api::protocol::Capabilities;
use synesthesia_api::{Client, ClientConfig, ClientError, ClientState, Server, ServerConfig};

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[test]
fn client_discovers_server_on_loopback() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("synesthesia.sock");

    let (server, _server_events) = Server::new(ServerConfig {
        server_name: "Loopback".into(),
        server_version: 7,
        ipc_endpoint: path.clone(),
        discovery_port: 0,
        discovery_bind_address: LOOPBACK,
        capabilities: Capabilities::new()
            .with(Capabilities::COLOUR_DATA_STREAMING)
            .with(Capabilities::XYZ_COLOUR_SPACE),
        ..ServerConfig::default()
    });
    server.start().unwrap();
    let port = server.discovery_addr().expect("discovery bound").port();

    let (client, _events) = Client::new(ClientConfig {
        discovery_port: port,
        discovery_address: LOOPBACK,
        discovery_timeout: Duration::from_secs(2),
        auto_reconnect: false,
        ..ClientConfig::default()
    });
    client.discover_and_connect().unwrap();

    assert_eq!(client.state(), ClientState::Connected);
    let info = client.server_info();
    assert_eq!(info.name, "Loopback");
    assert_eq!(info.version, 7);
    assert_eq!(info.endpoint, path);
    assert!(info.capabilities.has(Capabilities::XYZ_COLOUR_SPACE));
    assert!(!info.capabilities.has(Capabilities::LAB_COLOUR_SPACE));
}

#[test]
fn discovery_without_server_times_out() {
    // Bind and release a port so nothing is listening on it
    let port = std::net::UdpSocket::bind((LOOPBACK, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port();

    let (client, _events) = Client::new(ClientConfig {
        discovery_port: port,
        discovery_address: LOOPBACK,
        discovery_timeout: Duration::from_millis(250),
        ..ClientConfig::default()
    });

    assert!(matches!(
        client.discover_and_connect(),
        Err(ClientError::DiscoveryTimeout(_))
    ));
    assert!(!client.is_connected());
}
