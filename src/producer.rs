use crate::record::LogRecord;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pending delivery report for one enqueued payload.
pub type Delivery = Pin<Box<dyn Future<Output = Result<(), ProducerError>> + Send>>;

#[derive(thiserror::Error, Debug, Clone)]
pub enum ProducerError {
    #[error("cannot create producer: {0}")]
    Create(String),

    #[error("message rejected by broker: {0}")]
    Rejected(String),

    #[error("delivery report lost")]
    Canceled,
}

/// Low-level broker client: enqueue a keyed payload, get a delivery future.
///
/// Enqueueing is synchronous so payloads reach the client in submission
/// order; only the delivery reports resolve concurrently.
pub trait BrokerProducer: Send + Sync + 'static {
    fn send(&self, key: &str, payload: &[u8]) -> Delivery;
}

/// A formatted payload travelling with the record it was made from.
#[derive(Debug, Clone)]
pub struct ProducerMessage {
    pub key: String,
    pub payload: Vec<u8>,
    /// The untouched source record, returned on failure instead of
    /// re-parsing the payload.
    pub metadata: LogRecord,
}

#[derive(Debug)]
pub struct ProducerFailure {
    pub message: ProducerMessage,
    pub error: ProducerError,
}

/// Asynchronous producer: messages go in through `input`, rejected ones
/// come back out through `errors`.
pub struct AsyncProducer {
    pub input: mpsc::Sender<ProducerMessage>,
    pub errors: mpsc::Receiver<ProducerFailure>,
}

impl AsyncProducer {
    /// Spawn the pump task that feeds `backend` until `token` is cancelled.
    pub fn spawn(backend: Arc<dyn BrokerProducer>, capacity: usize, token: CancellationToken) -> Self {
        let capacity = capacity.max(1);
        let (input_tx, mut input_rx) = mpsc::channel::<ProducerMessage>(capacity);
        let (errors_tx, errors_rx) = mpsc::channel::<ProducerFailure>(capacity);

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = token.cancelled() => return,
                    message = input_rx.recv() => match message {
                        Some(message) => message,
                        None => return,
                    },
                };

                let delivery = backend.send(&message.key, &message.payload);
                let errors_tx = errors_tx.clone();
                tokio::spawn(async move {
                    if let Err(error) = delivery.await {
                        let _ = errors_tx.send(ProducerFailure { message, error }).await;
                    }
                });
            }
        });

        Self {
            input: input_tx,
            errors: errors_rx,
        }
    }
}
