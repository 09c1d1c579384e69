use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type SdkError = Box<dyn std::error::Error + Send + Sync>;

/// HTTP + WebSocket client for one gateway.
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    /// `base_url` is the gateway's HTTP root, e.g. `http://127.0.0.1:8080`.
    pub fn new(base_url: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch the public address → IP map of registered nodes.
    pub async fn list_nodes(&self) -> Result<HashMap<String, String>, SdkError> {
        let resp = self
            .client
            .get(format!("{}/nodes", self.base_url))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("Gateway returned error status {}", status).into());
        }
        Ok(resp.json().await?)
    }

    pub async fn health(&self) -> Result<serde_json::Value, SdkError> {
        let resp = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    /// The WebSocket URL of the upgrade endpoint.
    pub fn connect_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base_url.clone()
        };
        format!("{}/connect", ws_base)
    }

    /// Open a socket without announcing anything yet.
    pub async fn open(&self) -> Result<NodeSession, SdkError> {
        let (ws, _) = connect_async(self.connect_url()).await?;
        Ok(NodeSession { ws })
    }

    /// Open a socket and announce `public_address` as the handshake.
    pub async fn connect(&self, public_address: &[u8]) -> Result<NodeSession, SdkError> {
        let mut session = self.open().await?;
        session.announce(public_address).await?;
        Ok(session)
    }
}

/// A live node connection.
pub struct NodeSession {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl NodeSession {
    /// Send the handshake frame.
    pub async fn announce(&mut self, public_address: &[u8]) -> Result<(), SdkError> {
        self.ws.send(Message::binary(public_address.to_vec())).await?;
        Ok(())
    }

    /// Send a ping and wait for the matching pong; returns its payload.
    pub async fn ping(&mut self, payload: &[u8]) -> Result<Vec<u8>, SdkError> {
        self.ws.send(Message::Ping(payload.to_vec().into())).await?;
        loop {
            match self.ws.next().await {
                Some(Ok(Message::Pong(data))) if data.as_ref() == payload => return Ok(data.to_vec()),
                Some(Ok(Message::Close(_))) | None => return Err("connection closed".into()),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    pub async fn send_text(&mut self, text: &str) -> Result<(), SdkError> {
        self.ws.send(Message::text(text)).await?;
        Ok(())
    }

    /// Next frame from the gateway, if any.
    pub async fn next_message(&mut self) -> Option<Result<Message, SdkError>> {
        self.ws.next().await.map(|r| r.map_err(Into::into))
    }

    /// Read until the gateway closes the socket.
    pub async fn wait_closed(&mut self) {
        while let Some(Ok(message)) = self.ws.next().await {
            if message.is_close() {
                break;
            }
        }
    }

    /// Send a close frame and keep reading, to observe the gateway's reply.
    pub async fn send_close(&mut self) -> Result<(), SdkError> {
        self.ws.send(Message::Close(None)).await?;
        Ok(())
    }

    /// Close politely with a close frame.
    pub async fn close(mut self) -> Result<(), SdkError> {
        self.ws.close(None).await?;
        Ok(())
    }
}
