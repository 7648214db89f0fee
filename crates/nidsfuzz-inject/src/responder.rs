//! The responder accepts connections on the tuned channel and, for each
//! one, blocks on the broker for the matching tuning message before acting
//! on its opcode.

use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use nidsfuzz_core::error::Result;

use crate::broker::MessageBroker;
use crate::message::Opcode;

pub struct Responder {
    listener: TcpListener,
    broker: Arc<MessageBroker>,
}

impl Responder {
    pub async fn bind(addr: &str, broker: Arc<MessageBroker>) -> Result<Responder> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Responder { listener, broker })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts one connection on the tuned channel and serves it to
    /// completion, matching it to its tuning message by client port.
    pub async fn accept_one(&self) -> Result<()> {
        let (stream, peer) = self.listener.accept().await?;
        let broker = self.broker.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, peer, broker).await {
                tracing::warn!(?peer, error = %err, "tuned-channel connection terminated");
            }
        });
        Ok(())
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: std::net::SocketAddr,
    broker: Arc<MessageBroker>,
) -> Result<()> {
    let tuning = broker.consume(peer.ip(), peer.port()).await?;

    match tuning.opcode {
        Opcode::EchoWait => {
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.ok();
            stream.write_all(&tuning.data).await?;
        }
        Opcode::NoOp => {
            let mut request = Vec::new();
            stream.read_to_end(&mut request).await.ok();
        }
        Opcode::EchoNodelay => {
            // Per the resolved design note: write immediately, no read first.
            stream.write_all(&tuning.data).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TuningMessage;

    #[tokio::test]
    async fn echo_wait_sends_data_back_after_reading() {
        let broker = MessageBroker::new();
        let responder = Responder::bind("127.0.0.1:0", broker.clone()).await.unwrap();
        let addr = responder.local_addr().unwrap();

        let accept_task = tokio::spawn(async move { responder.accept_one().await });

        let client = TcpStream::connect(addr).await.unwrap();
        let client_port = client.local_addr().unwrap().port();
        broker
            .publish(
                "127.0.0.1".parse().unwrap(),
                client_port,
                TuningMessage::new(Opcode::EchoWait, client_port, b"pong".to_vec()),
            )
            .await
            .unwrap();

        accept_task.await.unwrap().unwrap();

        let mut client = client;
        client.write_all(b"ping").await.unwrap();
        client.shutdown().await.unwrap();

        let mut response = Vec::new();
        client.read_to_end(&mut response).await.unwrap();
        assert_eq!(response, b"pong");
    }
}
