//! Adaptive sampling state: throughput samples and computed probabilities

use crate::engine::Engine;
use crate::error::StoreResult;
use crate::tables;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;
use tracevault_common::{
    ServiceOperationProbabilities, ServiceOperationQps, Throughput, unix_micros,
};

#[derive(Serialize, Deserialize)]
struct StoredProbabilities {
    hostname: String,
    probabilities: ServiceOperationProbabilities,
    qps: ServiceOperationQps,
}

pub struct SamplingStore {
    engine: Arc<Engine>,
}

impl SamplingStore {
    #[must_use]
    pub const fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn insert_throughput(&self, throughput: &[Throughput]) -> StoreResult<()> {
        self.insert_throughput_at(throughput, SystemTime::now())
    }

    pub fn insert_throughput_at(
        &self,
        throughput: &[Throughput],
        at: SystemTime,
    ) -> StoreResult<()> {
        let bytes = bincode::serialize(throughput)?;
        self.engine
            .put_record(tables::THROUGHPUT, unix_micros(at), &bytes)
    }

    /// Throughput recorded in `[start, end]`, oldest first
    pub fn get_throughput(
        &self,
        start: SystemTime,
        end: SystemTime,
    ) -> StoreResult<Vec<Throughput>> {
        let mut result = Vec::new();
        for bytes in self
            .engine
            .records_between(tables::THROUGHPUT, unix_micros(start), unix_micros(end))?
        {
            let batch: Vec<Throughput> = bincode::deserialize(&bytes)?;
            result.extend(batch);
        }
        Ok(result)
    }

    pub fn insert_probabilities_and_qps(
        &self,
        hostname: &str,
        probabilities: &ServiceOperationProbabilities,
        qps: &ServiceOperationQps,
    ) -> StoreResult<()> {
        let bytes = bincode::serialize(&StoredProbabilities {
            hostname: hostname.to_string(),
            probabilities: probabilities.clone(),
            qps: qps.clone(),
        })?;
        self.engine.put_record(
            tables::PROBABILITIES,
            unix_micros(SystemTime::now()),
            &bytes,
        )
    }

    /// Most recently stored probabilities, or an empty map
    pub fn get_latest_probabilities(&self) -> StoreResult<ServiceOperationProbabilities> {
        match self.engine.latest_record(tables::PROBABILITIES)? {
            Some(bytes) => {
                let stored: StoredProbabilities = bincode::deserialize(&bytes)?;
                Ok(stored.probabilities)
            }
            None => Ok(ServiceOperationProbabilities::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::options;
    use std::collections::HashMap;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SamplingStore {
        SamplingStore::new(Arc::new(Engine::open(options(dir)).unwrap()))
    }

    fn throughput(service: &str, count: i64) -> Throughput {
        Throughput {
            service: service.to_string(),
            operation: "GET".to_string(),
            count,
            probabilities: vec!["0.001".to_string()],
        }
    }

    #[test]
    fn test_throughput_window() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let t = |secs| UNIX_EPOCH + Duration::from_secs(secs);

        store.insert_throughput_at(&[throughput("a", 1)], t(10)).unwrap();
        store
            .insert_throughput_at(&[throughput("b", 2), throughput("c", 3)], t(20))
            .unwrap();
        store.insert_throughput_at(&[throughput("d", 4)], t(30)).unwrap();

        let got = store.get_throughput(t(15), t(30)).unwrap();
        let services: Vec<_> = got.iter().map(|t| t.service.as_str()).collect();
        assert_eq!(services, vec!["b", "c", "d"]);
        assert!(store.get_throughput(t(31), t(40)).unwrap().is_empty());
    }

    #[test]
    fn test_latest_probabilities() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.get_latest_probabilities().unwrap().is_empty());

        let first = HashMap::from([(
            "svc".to_string(),
            HashMap::from([("GET".to_string(), 0.1)]),
        )]);
        let second = HashMap::from([(
            "svc".to_string(),
            HashMap::from([("GET".to_string(), 0.2)]),
        )]);
        store
            .insert_probabilities_and_qps("host-a", &first, &ServiceOperationQps::new())
            .unwrap();
        store
            .insert_probabilities_and_qps("host-b", &second, &ServiceOperationQps::new())
            .unwrap();

        assert_eq!(store.get_latest_probabilities().unwrap(), second);
    }
}
