use crate::producer::{BrokerProducer, Delivery, ProducerError};
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

/// Kafka client publishing every payload to one fixed topic with random
/// partition placement.
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    topic: String,
}

impl KafkaProducer {
    /// Create a producer for `brokers` (`host:port` addresses).
    pub fn new(brokers: &[String], topic: &str) -> Result<Self, ProducerError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers.join(","))
            .set("partitioner", "random")
            .create()
            .map_err(|e| ProducerError::Create(e.to_string()))?;

        Ok(KafkaProducer {
            producer,
            topic: topic.to_string(),
        })
    }
}

impl BrokerProducer for KafkaProducer {
    fn send(&self, key: &str, payload: &[u8]) -> Delivery {
        let record = FutureRecord::to(&self.topic).key(key).payload(payload);
        match self.producer.send_result(record) {
            Ok(delivery) => Box::pin(async move {
                match delivery.await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err((e, _))) => Err(ProducerError::Rejected(e.to_string())),
                    Err(_) => Err(ProducerError::Canceled),
                }
            }),
            Err((e, _)) => Box::pin(std::future::ready(Err(ProducerError::Rejected(e.to_string())))),
        }
    }
}
