//! Object store wrappers for observing and breaking storage calls.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use stitch_storage::{
    ByteStream, ObjectMeta, ObjectStore, StorageError, StorageResult, StreamingUpload,
};

/// Holds `put` calls for matching keys until the test releases them.
pub struct PutGate {
    prefix: String,
    arrived: Semaphore,
    release: Semaphore,
}

#[allow(dead_code)]
impl PutGate {
    /// Wait until one gated `put` is blocked.
    pub async fn arrived(&self) {
        self.arrived
            .acquire()
            .await
            .expect("gate semaphore closed")
            .forget();
    }

    /// Let one blocked `put` through.
    pub fn release(&self) {
        self.release.add_permits(1);
    }
}

/// Forwards to a real store, counting streaming uploads per key and
/// failing selected operations on demand.
#[allow(dead_code)]
pub struct InstrumentedStore {
    inner: Arc<dyn ObjectStore>,
    put_streams: Mutex<HashMap<String, usize>>,
    /// Fail every `put_stream` (artifact writes).
    pub fail_put_stream: AtomicBool,
    /// Fail every `put` (chunk writes).
    pub fail_put: AtomicBool,
    /// Fail `delete` for keys starting with this prefix.
    fail_delete_prefix: Mutex<Option<String>>,
    put_gate: Mutex<Option<Arc<PutGate>>>,
}

#[allow(dead_code)]
impl InstrumentedStore {
    pub fn new(inner: Arc<dyn ObjectStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            put_streams: Mutex::new(HashMap::new()),
            fail_put_stream: AtomicBool::new(false),
            fail_put: AtomicBool::new(false),
            fail_delete_prefix: Mutex::new(None),
            put_gate: Mutex::new(None),
        })
    }

    /// How many streaming uploads were opened for `key`.
    pub fn put_stream_count(&self, key: &str) -> usize {
        self.put_streams
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_fail_put_stream(&self, fail: bool) {
        self.fail_put_stream.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes_under(&self, prefix: Option<&str>) {
        *self.fail_delete_prefix.lock().unwrap() = prefix.map(str::to_string);
    }

    /// Block every `put` whose key starts with `prefix` until released.
    ///
    /// The write reaches the inner store only after release.
    pub fn gate_puts_under(&self, prefix: &str) -> Arc<PutGate> {
        let gate = Arc::new(PutGate {
            prefix: prefix.to_string(),
            arrived: Semaphore::new(0),
            release: Semaphore::new(0),
        });
        *self.put_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    fn injected(what: &str, key: &str) -> StorageError {
        StorageError::Io(std::io::Error::other(format!("injected {what} failure: {key}")))
    }
}

#[async_trait]
impl ObjectStore for InstrumentedStore {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn head(&self, key: &str) -> StorageResult<ObjectMeta> {
        self.inner.head(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        self.inner.get_stream(key).await
    }

    async fn get_range(&self, key: &str, start: u64, end: u64) -> StorageResult<Bytes> {
        self.inner.get_range(key, start, end).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(Self::injected("put", key));
        }
        let gate = self
            .put_gate
            .lock()
            .unwrap()
            .clone()
            .filter(|gate| key.starts_with(gate.prefix.as_str()));
        if let Some(gate) = gate {
            gate.arrived.add_permits(1);
            gate.release
                .acquire()
                .await
                .expect("gate semaphore closed")
                .forget();
        }
        self.inner.put(key, data).await
    }

    async fn put_stream(&self, key: &str) -> StorageResult<Box<dyn StreamingUpload>> {
        *self
            .put_streams
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default() += 1;
        if self.fail_put_stream.load(Ordering::SeqCst) {
            return Err(Self::injected("put_stream", key));
        }
        self.inner.put_stream(key).await
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let failing = self
            .fail_delete_prefix
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|prefix| key.starts_with(prefix.as_str()));
        if failing {
            return Err(Self::injected("delete", key));
        }
        self.inner.delete(key).await
    }

    fn backend_name(&self) -> &'static str {
        "instrumented"
    }
}
