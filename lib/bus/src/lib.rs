//! Push bus producer. The original source is Kafka-backed (sarama);
//! this crate uses `rdkafka` as the transport and exposes a narrow
//! `Bus` trait so tests can swap in an in-memory double.

use async_trait::async_trait;
use entities::Service;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde_json::Value;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// `push-<app_short>-<service>`, per §6.
pub fn topic_name(template: &str, app_short: &str, service: Service) -> String {
  template
    .replacen("%s", app_short, 1)
    .replacen("%s", service.as_str(), 1)
}

/// The result of a successful publish: broker-assigned placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
  pub partition: i32,
  pub offset: i64,
}

#[async_trait]
pub trait Bus: Send + Sync {
  async fn send(&self, topic: &str, envelope: &Value) -> anyhow::Result<Placement>;
}

/// `rdkafka`-backed producer. Ordering across batches is not promised;
/// ordering within one `send` call's return is whatever the broker
/// gives for that partition.
pub struct KafkaBus {
  producer: FutureProducer,
}

impl KafkaBus {
  pub fn new(brokers: &str) -> anyhow::Result<Self> {
    let producer = ClientConfig::new()
      .set("bootstrap.servers", brokers)
      .set("message.timeout.ms", "30000")
      .create()?;
    Ok(Self { producer })
  }
}

#[async_trait]
impl Bus for KafkaBus {
  async fn send(&self, topic: &str, envelope: &Value) -> anyhow::Result<Placement> {
    let payload = serde_json::to_vec(envelope)?;
    let record: FutureRecord<'_, str, Vec<u8>> =
      FutureRecord::to(topic).payload(&payload);
    let (partition, offset) = self
      .producer
      .send(record, Duration::from_secs(5))
      .await
      .map_err(|(err, _)| anyhow::anyhow!(err))?;
    debug!(topic, partition, offset, "published envelope");
    Ok(Placement { partition, offset })
  }
}

/// In-memory double used by unit and integration tests; records every
/// published envelope in arrival order.
#[derive(Default)]
pub struct MockBus {
  sent: Mutex<Vec<(String, Value)>>,
}

impl MockBus {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn messages(&self) -> Vec<(String, Value)> {
    self.sent.lock().unwrap().clone()
  }

  pub fn len(&self) -> usize {
    self.sent.lock().unwrap().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[async_trait]
impl Bus for MockBus {
  async fn send(&self, topic: &str, envelope: &Value) -> anyhow::Result<Placement> {
    let mut sent = self.sent.lock().unwrap();
    let offset = sent.len() as i64;
    sent.push((topic.to_string(), envelope.clone()));
    Ok(Placement { partition: 0, offset })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn topic_name_substitutes_both_positions() {
    assert_eq!(
      topic_name("push-%s-%s", "sample", Service::Gcm),
      "push-sample-gcm"
    );
  }

  #[tokio::test]
  async fn mock_bus_records_messages_in_order() {
    let bus = MockBus::new();
    bus.send("push-sample-gcm", &json!({"to": "T1"})).await.unwrap();
    bus.send("push-sample-gcm", &json!({"to": "T2"})).await.unwrap();
    let messages = bus.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].1["to"], "T1");
    assert_eq!(messages[1].1["to"], "T2");
  }

  #[tokio::test]
  async fn mock_bus_assigns_monotonic_offsets() {
    let bus = MockBus::new();
    let p0 = bus.send("t", &json!({})).await.unwrap();
    let p1 = bus.send("t", &json!({})).await.unwrap();
    assert_eq!(p0.offset, 0);
    assert_eq!(p1.offset, 1);
  }
}
