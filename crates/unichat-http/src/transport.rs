//! axum WebSocket adapter for the realtime [`Transport`] seam.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use unichat_realtime::{Inbound, Transport, TransportError, TransportResult};

pub struct AxumTransport {
    socket: WebSocket,
    closed: bool,
}

impl AxumTransport {
    pub fn new(socket: WebSocket) -> Self {
        Self {
            socket,
            closed: false,
        }
    }
}

#[async_trait]
impl Transport for AxumTransport {
    async fn send_text(&mut self, text: &str) -> TransportResult<()> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.socket.send(Message::Text(text.to_owned().into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.closed = true;
                Err(TransportError::Io(e.to_string()))
            }
        }
    }

    async fn recv(&mut self) -> TransportResult<Inbound> {
        if self.closed {
            return Ok(Inbound::Closed);
        }
        match self.socket.recv().await {
            Some(Ok(Message::Text(text))) => Ok(Inbound::Data { len: text.len() }),
            Some(Ok(Message::Binary(data))) => Ok(Inbound::Data { len: data.len() }),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => Ok(Inbound::Control),
            Some(Ok(Message::Close(_))) | None => {
                self.closed = true;
                Ok(Inbound::Closed)
            }
            Some(Err(e)) => {
                self.closed = true;
                Err(TransportError::Io(e.to_string()))
            }
        }
    }

    async fn close(&mut self) -> TransportResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let frame = CloseFrame {
            code: close_code::NORMAL,
            reason: "".into(),
        };
        self.socket
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::Io(e.to_string()))
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}
