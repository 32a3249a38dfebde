//! In-memory transport that records every call.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::transport::{ObjectStat, TOTAL_LENGTH_HEADER, Transport, TransportError, TransportFuture};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Mkcol(String),
    Write { path: String, len: usize },
    Stat(String),
    Rename {
        src: String,
        dst: String,
        total_length: Option<String>,
    },
    RemoveAll(String),
}

#[derive(Default)]
pub(crate) struct MockTransport {
    ops: Mutex<Vec<Op>>,
    headers: Mutex<HashMap<String, String>>,
    objects: Mutex<HashMap<String, ObjectStat>>,
    failing_writes: Mutex<u32>,
    mkcol_error: Mutex<Option<TransportError>>,
    rename_error: Mutex<Option<TransportError>>,
    write_gate: Mutex<Option<Arc<Semaphore>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails the next `n` writes.
    pub(crate) fn fail_writes(&self, n: u32) {
        *self.failing_writes.lock().unwrap() = n;
    }

    pub(crate) fn fail_mkcol(&self, err: TransportError) {
        *self.mkcol_error.lock().unwrap() = Some(err);
    }

    pub(crate) fn fail_rename(&self, err: TransportError) {
        *self.rename_error.lock().unwrap() = Some(err);
    }

    /// Blocks every write until the returned gate hands out a permit.
    /// Each permit lets one write through.
    pub(crate) fn hold_writes(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.write_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub(crate) fn put_object(&self, path: &str, stat: ObjectStat) {
        self.objects.lock().unwrap().insert(path.to_string(), stat);
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    /// `(path, len)` of every write attempt, in order.
    pub(crate) fn writes(&self) -> Vec<(String, usize)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Write { path, len } => Some((path, len)),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops().iter().filter(|op| pred(op)).count()
    }

    pub(crate) fn header(&self, name: &str) -> Option<String> {
        self.headers.lock().unwrap().get(name).cloned()
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

impl Transport for MockTransport {
    fn create_collection<'a>(&'a self, path: &'a str, _recursive: bool) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.record(Op::Mkcol(path.to_string()));
            // Only staging collections are failed, parent creation is best effort.
            if path.starts_with("uploads/")
                && let Some(err) = self.mkcol_error.lock().unwrap().clone()
            {
                return Err(err);
            }
            Ok(())
        })
    }

    fn write_object<'a>(&'a self, path: &'a str, data: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            let gate = self.write_gate.lock().unwrap().clone();
            if let Some(gate) = gate
                && let Ok(permit) = gate.acquire().await
            {
                permit.forget();
            }
            self.record(Op::Write {
                path: path.to_string(),
                len: data.len(),
            });
            let mut failing = self.failing_writes.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(TransportError::with_status(503, "Service Unavailable"));
            }
            Ok(())
        })
    }

    fn stat_object<'a>(&'a self, path: &'a str) -> TransportFuture<'a, Option<ObjectStat>> {
        Box::pin(async move {
            self.record(Op::Stat(path.to_string()));
            Ok(self.objects.lock().unwrap().get(path).copied())
        })
    }

    fn rename_object<'a>(
        &'a self,
        src: &'a str,
        dst: &'a str,
        _overwrite: bool,
    ) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.record(Op::Rename {
                src: src.to_string(),
                dst: dst.to_string(),
                total_length: self.header(TOTAL_LENGTH_HEADER),
            });
            match self.rename_error.lock().unwrap().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn remove_all<'a>(&'a self, path: &'a str) -> TransportFuture<'a, ()> {
        Box::pin(async move {
            self.record(Op::RemoveAll(path.to_string()));
            Ok(())
        })
    }

    fn set_protocol_header(&self, name: &str, value: &str) {
        let mut headers = self.headers.lock().unwrap();
        if value.is_empty() {
            headers.remove(name);
        } else {
            headers.insert(name.to_string(), value.to_string());
        }
    }
}
