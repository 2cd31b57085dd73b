//! Integration tests for the port-forward manager and the m2m dispatcher.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{EchoServer, FailingTransport, MockTransport};
use portgate::{
    Error, M2mManager, PortForwardManager, Route, ServiceDefinition, ServiceRegistry,
    ServiceState, TcpTransport,
};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

const TUNNEL_HOST: &str = "m2m.test";

fn registry() -> ServiceRegistry {
    ServiceRegistry::from_definitions(vec![
        ServiceDefinition {
            name: "web".into(),
            local_port: 80,
            default_route: Route::default(),
        },
        ServiceDefinition {
            name: "ssh".into(),
            local_port: 22,
            default_route: Route::default(),
        },
    ])
    .unwrap()
}

fn manager_with(transport: Arc<MockTransport>) -> Arc<PortForwardManager> {
    PortForwardManager::init(transport, registry(), "127.0.0.1", TUNNEL_HOST)
}

#[tokio::test]
async fn open_unknown_service_is_a_noop() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    assert!(manager.get_service("new-service").is_none());
    assert!(manager.get_service_on_port(1234).is_none());

    let route = Route::new("node1", 8888, "node2", 8888);
    let result = manager.open_service(Some("port-1234"), route).await.unwrap();

    assert!(result.is_none());
    assert_eq!(transport.connect_count(), 0);
    assert!(manager.active_ports().is_empty());
}

#[tokio::test]
async fn redirect_port_connects_and_is_retained() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let service = manager.redirect_port(9999, 22).await.unwrap();

    assert_eq!(service.state(), ServiceState::Connected);
    assert_eq!(service.local().port, 9999);
    assert_eq!(service.remote().port, 22);
    assert_eq!(service.remote().host, TUNNEL_HOST);

    // One service, two byte streams: local end and tunnel end.
    let opened = transport.opened_endpoints();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[0].port, 9999);
    assert_eq!(opened[1].port, 22);

    assert_eq!(manager.active_ports(), vec![9999]);
}

#[tokio::test]
async fn instruction_is_equivalent_to_direct_redirect() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));
    let m2m = M2mManager::new("ws://localhost/", "device-1", Arc::clone(&manager));

    m2m.on_instruction(
        "sender",
        json!({"action": "open-portredirect", "device_port": 22, "m2m_port": 1234}),
    )
    .await;

    let service = manager.active_service(22).expect("redirect retained");
    assert_eq!(service.local().port, 22);
    assert_eq!(service.remote().port, 1234);
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn extra_instruction_fields_are_ignored() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));
    let m2m = M2mManager::new("ws://localhost/", "device-1", Arc::clone(&manager));

    m2m.on_instruction(
        "sender",
        json!({
            "action": "open-portredirect",
            "device_port": 22,
            "m2m_port": 1234,
            "ttl": 60,
            "comment": "requested by support"
        }),
    )
    .await;

    assert_eq!(manager.active_ports(), vec![22]);
}

#[tokio::test]
async fn open_resolves_by_name_and_by_port() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let by_name = manager.open(1234, Some("web"), None).await.unwrap().unwrap();
    assert_eq!(by_name.local().port, 80);
    assert_eq!(by_name.remote().port, 1234);
    assert_eq!(by_name.service_name().as_deref(), Some("web"));
    assert_eq!(transport.connect_count(), 2);

    let by_port = manager.open(4022, None, Some(22)).await.unwrap().unwrap();
    assert_eq!(by_port.local().port, 22);
    assert_eq!(by_port.remote().port, 4022);
    assert_eq!(transport.connect_count(), 4);
}

#[tokio::test]
async fn open_without_a_target_is_an_error() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let result = manager.open(1234, None, None).await;
    assert!(matches!(result, Err(Error::InvalidRoute { .. })));
    assert_eq!(transport.connect_count(), 0);
}

#[tokio::test]
async fn incomplete_route_is_an_error() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let route = Route {
        local_host: Some("localhost".into()),
        local_port: Some(22),
        remote_host: Some("example.com".into()),
        remote_port: None,
    };
    let result = manager.open_service(None, route).await;

    assert!(matches!(result, Err(Error::InvalidRoute { .. })));
    assert_eq!(transport.connect_count(), 0);
    assert!(manager.active_ports().is_empty());
}

#[tokio::test]
async fn connect_failure_is_not_retained() {
    let manager = PortForwardManager::init(
        Arc::new(FailingTransport),
        registry(),
        "127.0.0.1",
        TUNNEL_HOST,
    );

    let result = manager.redirect_port(9999, 22).await;
    assert!(matches!(result, Err(Error::Connect { .. })));
    assert!(manager.active_ports().is_empty());
}

#[tokio::test]
async fn connect_twice_is_an_invalid_state() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let service = manager.redirect_port(9999, 22).await.unwrap();
    let result = service.connect().await;
    assert!(matches!(result, Err(Error::InvalidState { .. })));
    // No extra streams were opened by the failed attempt.
    assert_eq!(transport.connect_count(), 2);
}

#[tokio::test]
async fn close_is_idempotent() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let service = manager.redirect_port(9999, 22).await.unwrap();
    assert!(manager.close_port(9999));
    assert_eq!(service.state(), ServiceState::Closed);
    assert!(!manager.close_port(9999));

    service.close();
    service.close();
    assert_eq!(service.state(), ServiceState::Closed);
}

#[tokio::test]
async fn opening_the_same_port_replaces_the_old_forward() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let first = manager.redirect_port(9999, 22).await.unwrap();
    let second = manager.redirect_port(9999, 23).await.unwrap();

    assert_eq!(manager.active_ports(), vec![9999]);
    assert_eq!(first.state(), ServiceState::Closed);
    assert_eq!(second.state(), ServiceState::Connected);
    assert_eq!(
        manager.active_service(9999).unwrap().remote().port,
        23
    );
}

#[tokio::test]
async fn concurrent_redirects_are_all_retained() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let mut handles = Vec::new();
    for i in 0..16u16 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager.redirect_port(10_000 + i, 20_000 + i).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let mut ports = manager.active_ports();
    ports.sort_unstable();
    let expected: Vec<u16> = (10_000..10_016).collect();
    assert_eq!(ports, expected);
    assert_eq!(transport.connect_count(), 32);
}

#[tokio::test]
async fn close_instruction_tears_down_the_redirect() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));
    let m2m = M2mManager::new("ws://localhost/", "device-1", Arc::clone(&manager));

    m2m.on_instruction(
        "sender",
        json!({"action": "open-portredirect", "device_port": 22, "m2m_port": 1234}),
    )
    .await;
    assert_eq!(manager.active_ports(), vec![22]);

    m2m.on_instruction(
        "sender",
        json!({"action": "close-portredirect", "device_port": 22}),
    )
    .await;
    assert!(manager.active_ports().is_empty());

    // Closing again is a contained no-op.
    m2m.on_instruction(
        "sender",
        json!({"action": "close-portredirect", "device_port": 22}),
    )
    .await;
}

#[tokio::test]
async fn relay_carries_bytes_and_outlives_the_caller_reference() {
    let echo = EchoServer::start().await;
    let tunnel_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let m2m_port = tunnel_listener.local_addr().unwrap().port();

    let manager = PortForwardManager::init(
        Arc::new(TcpTransport),
        ServiceRegistry::new(),
        "127.0.0.1",
        "127.0.0.1",
    );

    let service = manager.redirect_port(echo.port, m2m_port).await.unwrap();
    // The manager's active set, not this handle, keeps the relay alive.
    drop(service);

    let (mut tunnel_side, _) = timeout(Duration::from_secs(5), tunnel_listener.accept())
        .await
        .expect("accept timed out")
        .unwrap();

    let payload = b"hello portgate";
    tunnel_side.write_all(payload).await.unwrap();

    let mut buf = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), tunnel_side.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .unwrap();
    assert_eq!(&buf, payload);

    // close_port unblocks the relay promptly: the tunnel side sees EOF.
    assert!(manager.close_port(echo.port));
    let mut rest = Vec::new();
    let n = timeout(Duration::from_secs(5), tunnel_side.read_to_end(&mut rest))
        .await
        .expect("close did not unblock the relay")
        .unwrap();
    assert_eq!(n, 0);
}

#[tokio::test]
async fn shutdown_closes_every_active_service() {
    let transport = Arc::new(MockTransport::new());
    let manager = manager_with(Arc::clone(&transport));

    let a = manager.redirect_port(9000, 22).await.unwrap();
    let b = manager.redirect_port(9001, 23).await.unwrap();

    manager.shutdown();
    assert!(manager.active_ports().is_empty());
    assert_eq!(a.state(), ServiceState::Closed);
    assert_eq!(b.state(), ServiceState::Closed);
}
