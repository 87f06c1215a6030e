//! Hand-written session fakes shared by the store tests

use crate::session::{BackendError, Query, Row, RowIter, Session};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use tracing::subscriber::DefaultGuard;

/// Scripted session: records every executed statement
#[derive(Default)]
pub struct FakeSession {
    /// Probe statements (`SELECT * from ...`) fail when false
    pub probe_ok: bool,
    /// Error returned by every non-probe `execute`
    pub exec_error: Option<String>,
    /// Rows handed out by the next `iter`
    pub rows: Mutex<Vec<Row>>,
    /// Error reported by the cursor on close
    pub close_error: Option<String>,
    pub executed: Mutex<Vec<Query>>,
    pub queried: Mutex<Vec<Query>>,
}

impl FakeSession {
    pub fn latest() -> Self {
        Self {
            probe_ok: true,
            ..Self::default()
        }
    }

    pub fn previous() -> Self {
        Self::default()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn execute(&self, query: &Query) -> Result<(), BackendError> {
        if query.statement().starts_with("SELECT * from") {
            return if self.probe_ok {
                Ok(())
            } else {
                Err(BackendError::new("unconfigured table"))
            };
        }
        self.executed.lock().push(query.clone());
        match &self.exec_error {
            Some(msg) => Err(BackendError::new(msg.clone())),
            None => Ok(()),
        }
    }

    async fn iter(&self, query: &Query) -> Box<dyn RowIter> {
        self.queried.lock().push(query.clone());
        Box::new(FakeIter {
            rows: std::mem::take(&mut *self.rows.lock()).into(),
            close_error: self.close_error.clone(),
        })
    }
}

struct FakeIter {
    rows: VecDeque<Row>,
    close_error: Option<String>,
}

#[async_trait]
impl RowIter for FakeIter {
    async fn scan(&mut self) -> Option<Row> {
        self.rows.pop_front()
    }

    async fn close(self: Box<Self>) -> Result<(), BackendError> {
        match self.close_error {
            Some(msg) => Err(BackendError::new(msg)),
            None => Ok(()),
        }
    }
}

/// In-memory sink for JSON log lines
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    /// Route this thread's logs into the buffer as flattened JSON
    pub fn install(&self) -> DefaultGuard {
        let buffer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .without_time()
            .with_writer(move || buffer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter_map(|l| serde_json::from_str(l).ok())
            .collect()
    }
}
