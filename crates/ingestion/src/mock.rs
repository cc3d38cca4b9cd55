//! Mock producers and synthetic traffic

use std::collections::VecDeque;

use bytes::Bytes;
use chrono::Utc;
use contracts::{ContractError, Producer, Record, SequenceToken};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Producer over a fixed list of records; reports end of stream when empty.
pub struct MockProducer {
    name: String,
    pending: VecDeque<Record>,
    chunk_size: usize,
    /// Number of leading polls that fail with a producer error
    fail_polls: u32,
}

impl MockProducer {
    pub fn from_records(name: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            name: name.into(),
            pending: records.into(),
            chunk_size: usize::MAX,
            fail_polls: 0,
        }
    }

    /// Records stamped now, sequence numbers starting at 0.
    pub fn from_payloads<I, B>(name: impl Into<String>, payloads: I) -> Self
    where
        I: IntoIterator<Item = B>,
        B: Into<Bytes>,
    {
        let now = Utc::now();
        let records = payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Record::new(p, now, SequenceToken(i as u64)))
            .collect();
        Self::from_records(name, records)
    }

    /// Synthetic web-request records, see [`synthetic_payloads`].
    pub fn synthetic(name: impl Into<String>, count: usize, seed: u64) -> Self {
        Self::from_payloads(name, synthetic_payloads(count, seed))
    }

    /// Cap each poll at `chunk_size` records regardless of the caller's max.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn with_failing_polls(mut self, fail_polls: u32) -> Self {
        self.fail_polls = fail_polls;
        self
    }
}

impl Producer for MockProducer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll(&mut self, max_records: usize) -> Result<Option<Vec<Record>>, ContractError> {
        if self.fail_polls > 0 {
            self.fail_polls -= 1;
            return Err(ContractError::producer(&self.name, "injected poll failure"));
        }
        if self.pending.is_empty() {
            return Ok(None);
        }
        let take = max_records.max(1).min(self.chunk_size).min(self.pending.len());
        Ok(Some(self.pending.drain(..take).collect()))
    }
}

const PATHS: [&str; 4] = ["/", "/login", "/cart", "/checkout"];
const STATUSES: [u16; 8] = [200, 200, 200, 201, 304, 404, 500, 503];

/// Deterministic JSON request logs:
/// `{"id":N,"user":"uN","path":"/x","status":200,"latencyMs":12.5,"ts":"..."}`.
pub fn synthetic_payloads(count: usize, seed: u64) -> Vec<Bytes> {
    let mut rng = StdRng::seed_from_u64(seed);
    let now = Utc::now();
    (0..count)
        .map(|id| {
            let body = serde_json::json!({
                "id": id,
                "user": format!("u{}", rng.random_range(0..50)),
                "path": PATHS[rng.random_range(0..PATHS.len())],
                "status": STATUSES[rng.random_range(0..STATUSES.len())],
                "latencyMs": (rng.random_range(1.0..500.0_f64) * 10.0).round() / 10.0,
                "ts": now.to_rfc3339(),
            });
            Bytes::from(body.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_producer_chunks_then_ends() {
        let mut producer = MockProducer::from_payloads("m", ["a", "b", "c"]).with_chunk_size(2);
        assert_eq!(producer.poll(10).await.unwrap().unwrap().len(), 2);
        assert_eq!(producer.poll(10).await.unwrap().unwrap().len(), 1);
        assert!(producer.poll(10).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failing_polls_come_first() {
        let mut producer = MockProducer::from_payloads("m", ["a"]).with_failing_polls(1);
        assert!(producer.poll(1).await.is_err());
        assert_eq!(producer.poll(1).await.unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_synthetic_is_deterministic_json() {
        let a = synthetic_payloads(20, 7);
        let b = synthetic_payloads(20, 7);
        assert_eq!(a.len(), 20);
        for (x, y) in a.iter().zip(&b) {
            let x: serde_json::Value = serde_json::from_slice(x).unwrap();
            let y: serde_json::Value = serde_json::from_slice(y).unwrap();
            assert_eq!(x["status"], y["status"]);
            assert!(x["status"].is_u64());
        }
    }
}
