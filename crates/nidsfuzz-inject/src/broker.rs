//! Process-wide `(ip, port) -> TuningMessage` exchange between the tuning
//! channel (publisher) and the tuned channel (consumer), with bounded waits
//! on both sides.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use nidsfuzz_core::error::{Error, Result};

use crate::message::TuningMessage;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Default)]
pub struct MessageBroker {
    slots: Mutex<HashMap<(IpAddr, u16), TuningMessage>>,
    notify: Notify,
}

impl MessageBroker {
    pub fn new() -> Arc<MessageBroker> {
        Arc::new(MessageBroker {
            slots: Mutex::new(HashMap::new()),
            notify: Notify::new(),
        })
    }

    /// Publishes a message for `(ip, port)`, waiting (bounded) if the slot
    /// is already occupied by an unconsumed message.
    pub async fn publish(&self, ip: IpAddr, port: u16, message: TuningMessage) -> Result<()> {
        tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                {
                    let mut slots = self.slots.lock().await;
                    if !slots.contains_key(&(ip, port)) {
                        slots.insert((ip, port), message);
                        self.notify.notify_waiters();
                        return;
                    }
                }
                self.notify.notified().await;
            }
        })
        .await
        .map_err(|_| Error::BrokerTimeout(format!("publish timed out for {ip}:{port}")))
    }

    /// Consumes the message for `(ip, port)`, waiting (bounded) if it has
    /// not yet been published.
    pub async fn consume(&self, ip: IpAddr, port: u16) -> Result<TuningMessage> {
        tokio::time::timeout(DEFAULT_TIMEOUT, async {
            loop {
                {
                    let mut slots = self.slots.lock().await;
                    if let Some(message) = slots.remove(&(ip, port)) {
                        self.notify.notify_waiters();
                        return message;
                    }
                }
                self.notify.notified().await;
            }
        })
        .await
        .map_err(|_| Error::BrokerTimeout(format!("consume timed out for {ip}:{port}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Opcode;

    #[tokio::test]
    async fn publish_then_consume_round_trips() {
        let broker = MessageBroker::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let message = TuningMessage::new(Opcode::NoOp, 9999, b"x".to_vec());

        broker.publish(ip, 9999, message.clone()).await.unwrap();
        let consumed = broker.consume(ip, 9999).await.unwrap();
        assert_eq!(consumed, message);
    }

    #[tokio::test]
    async fn consume_times_out_when_never_published() {
        let broker = MessageBroker::new();
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let result = tokio::time::timeout(Duration::from_millis(1100), broker.consume(ip, 1))
            .await
            .unwrap();
        assert!(result.is_err());
    }
}
