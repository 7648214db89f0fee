//! The initiator drives one test case: publish a tuning message for the
//! upcoming tuned-channel connection, then speak that connection.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use nidsfuzz_core::error::Result;

use crate::message::{Opcode, TuningMessage};

pub struct Initiator {
    tuning_addr: String,
    tuned_addr: String,
    bind_ip: std::net::IpAddr,
}

impl Initiator {
    pub fn new(tuning_addr: impl Into<String>, tuned_addr: impl Into<String>, bind_ip: std::net::IpAddr) -> Initiator {
        Initiator {
            tuning_addr: tuning_addr.into(),
            tuned_addr: tuned_addr.into(),
            bind_ip,
        }
    }

    /// Sends `request` on the tuned channel and returns whatever the
    /// responder echoes back per `response`'s opcode, or `None` if the pair
    /// was empty and the case was skipped.
    pub async fn inject(&self, request: &[u8], response: &[u8], bind_port: u16) -> Result<std::option::Option<Vec<u8>>> {
        let Some(opcode) = Opcode::for_pair(request, response) else {
            return Ok(None);
        };

        let mut tuning = TcpStream::connect(&self.tuning_addr).await?;
        let message = TuningMessage::new(opcode, bind_port, response.to_vec());
        tuning.write_all(&message.encode()).await?;

        let local = std::net::SocketAddr::new(self.bind_ip, bind_port);
        let socket = tokio::net::TcpSocket::new_v4()?;
        socket.set_reuseaddr(true)?;
        socket.bind(local)?;
        let mut tuned = socket.connect(self.tuned_addr.parse().unwrap()).await?;

        match opcode {
            Opcode::EchoWait => {
                tuned.write_all(request).await?;
                tuned.shutdown().await?;
                let mut received = Vec::new();
                tuned.read_to_end(&mut received).await?;
                Ok(Some(received))
            }
            Opcode::NoOp => {
                tuned.write_all(request).await?;
                tuned.shutdown().await?;
                Ok(None)
            }
            Opcode::EchoNodelay => {
                let mut received = Vec::new();
                tuned.read_to_end(&mut received).await?;
                Ok(Some(received))
            }
        }
    }
}
