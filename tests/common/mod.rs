//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::time::Duration;
use gateway_sdk::GatewayClient;
use node_gateway::config::GatewayConfig;
use node_gateway::http::AppState;
use node_gateway::lifecycle::Shutdown;
use node_gateway::GatewayServer;

#[allow(dead_code)]
pub const HANDSHAKE: Duration = Duration::from_millis(300);
#[allow(dead_code)]
pub const IDLE: Duration = Duration::from_millis(900);

/// A gateway running on an ephemeral port.
pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: AppState,
    pub shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestGateway {
    pub fn client(&self) -> GatewayClient {
        GatewayClient::new(&format!("http://{}", self.addr))
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Start a gateway with short handshake and idle timeouts.
pub async fn start_gateway() -> TestGateway {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.timeouts.handshake_ms = HANDSHAKE.as_millis() as u64;
    config.timeouts.idle_ms = IDLE.as_millis() as u64;

    let listener = tokio::net::TcpListener::bind(&config.listener.bind_address)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();

    let server = GatewayServer::new(config);
    let state = server.state().clone();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestGateway {
        addr,
        state,
        shutdown,
    }
}

/// Poll `check` until it holds or `within` elapses.
#[allow(dead_code)]
pub async fn eventually<F: Fn() -> bool>(within: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
