//! Mock collaborators and stores for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::{ArtifactRef, RunId};
use crate::errors::{CollaboratorError, ReportflowError};
use crate::stages::{Collaborator, StageInputs, StageProducts};
use crate::store::{ArtifactStore, InMemoryArtifactStore};

/// A collaborator that always returns the same products.
#[derive(Debug)]
pub struct StaticCollaborator {
    name: String,
    products: StageProducts,
    calls: AtomicUsize,
}

impl StaticCollaborator {
    /// Creates a collaborator returning no products.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            products: StageProducts::new(),
            calls: AtomicUsize::new(0),
        }
    }

    /// Adds a product to return.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.products.insert(name, payload);
        self
    }

    /// Returns the number of times the collaborator was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collaborator for StaticCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.products.clone())
    }
}

type Scripted = Result<StageProducts, CollaboratorError>;

/// A collaborator that plays back a queue of results.
///
/// Once the queue is drained it returns the `always` result, or a permanent
/// error if none was set.
#[derive(Debug)]
pub struct ScriptedCollaborator {
    name: String,
    script: Mutex<VecDeque<Scripted>>,
    fallback: Option<Scripted>,
    calls: AtomicUsize,
}

impl ScriptedCollaborator {
    /// Creates a collaborator with an empty script.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Queues the result of the next call.
    #[must_use]
    pub fn then(self, result: Scripted) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Sets the result returned once the queue is empty.
    #[must_use]
    pub fn always(mut self, result: Scripted) -> Self {
        self.fallback = Some(result);
        self
    }

    /// Returns the number of times the collaborator was invoked.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collaborator for ScriptedCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().pop_front();
        next.or_else(|| self.fallback.clone()).unwrap_or_else(|| {
            Err(CollaboratorError::permanent(format!(
                "script for '{}' exhausted",
                self.name
            )))
        })
    }
}

/// A collaborator that sleeps before answering.
#[derive(Debug)]
pub struct SlowCollaborator {
    name: String,
    delay: Duration,
    products: StageProducts,
}

impl SlowCollaborator {
    /// Creates a slow collaborator returning no products.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            products: StageProducts::new(),
        }
    }

    /// Adds a product to return after the delay.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.products.insert(name, payload);
        self
    }
}

#[async_trait]
impl Collaborator for SlowCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.products.clone())
    }
}

/// A collaborator that records the inputs it was given.
#[derive(Debug)]
pub struct RecordingCollaborator {
    name: String,
    products: StageProducts,
    seen: Mutex<Vec<Vec<(String, Vec<u8>)>>>,
}

impl RecordingCollaborator {
    /// Creates a recorder returning no products.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            products: StageProducts::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Adds a product to return.
    #[must_use]
    pub fn with_output(mut self, name: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        self.products.insert(name, payload);
        self
    }

    /// Input names of each call, in call order.
    #[must_use]
    pub fn seen_names(&self) -> Vec<Vec<String>> {
        self.seen
            .lock()
            .iter()
            .map(|call| call.iter().map(|(n, _)| n.clone()).collect())
            .collect()
    }

    /// Payload of a named input on the most recent call.
    #[must_use]
    pub fn last_payload(&self, name: &str) -> Option<Vec<u8>> {
        self.seen
            .lock()
            .last()
            .and_then(|call| call.iter().find(|(n, _)| n == name))
            .map(|(_, p)| p.clone())
    }
}

#[async_trait]
impl Collaborator for RecordingCollaborator {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, inputs: &StageInputs) -> Result<StageProducts, CollaboratorError> {
        let call = inputs
            .names()
            .map(|n| (n.to_string(), inputs.bytes(n).map(<[u8]>::to_vec).unwrap_or_default()))
            .collect();
        self.seen.lock().push(call);
        Ok(self.products.clone())
    }
}

/// An in-memory store whose `put` fails for one artifact name.
#[derive(Debug)]
pub struct FailingPutStore {
    inner: InMemoryArtifactStore,
    fail_on: String,
}

impl FailingPutStore {
    /// Creates a store that rejects writes of `fail_on`.
    #[must_use]
    pub fn new(fail_on: impl Into<String>) -> Self {
        Self {
            inner: InMemoryArtifactStore::new(),
            fail_on: fail_on.into(),
        }
    }
}

#[async_trait]
impl ArtifactStore for FailingPutStore {
    async fn begin_run(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        self.inner.begin_run(run_id).await
    }

    async fn put(
        &self,
        run_id: &RunId,
        name: &str,
        payload: &[u8],
        producing_stage: &str,
    ) -> Result<ArtifactRef, ReportflowError> {
        if name == self.fail_on {
            return Err(ReportflowError::Internal(format!("injected write failure for '{name}'")));
        }
        self.inner.put(run_id, name, payload, producing_stage).await
    }

    async fn get(&self, run_id: &RunId, name: &str) -> Result<Vec<u8>, ReportflowError> {
        self.inner.get(run_id, name).await
    }

    async fn exists(&self, run_id: &RunId, name: &str) -> bool {
        self.inner.exists(run_id, name).await
    }

    async fn metadata(&self, run_id: &RunId, name: &str) -> Result<ArtifactRef, ReportflowError> {
        self.inner.metadata(run_id, name).await
    }

    async fn list(&self, run_id: &RunId) -> Result<Vec<ArtifactRef>, ReportflowError> {
        self.inner.list(run_id).await
    }

    async fn purge(&self, run_id: &RunId) -> Result<(), ReportflowError> {
        self.inner.purge(run_id).await
    }

    async fn discard(&self, run_id: &RunId, name: &str) -> Result<(), ReportflowError> {
        self.inner.discard(run_id, name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_collaborator_counts_calls() {
        let c = StaticCollaborator::new("static").with_output("out", b"x".to_vec());
        let products = c.invoke(&StageInputs::new()).await.unwrap();
        assert_eq!(products.get("out"), Some(&b"x"[..]));
        c.invoke(&StageInputs::new()).await.unwrap();
        assert_eq!(c.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_collaborator_plays_queue_then_fallback() {
        let c = ScriptedCollaborator::new("scripted")
            .then(Err(CollaboratorError::transient("429")))
            .always(Ok(StageProducts::new().with("out", b"ok".to_vec())));

        assert!(c.invoke(&StageInputs::new()).await.is_err());
        assert!(c.invoke(&StageInputs::new()).await.is_ok());
        assert!(c.invoke(&StageInputs::new()).await.is_ok());
        assert_eq!(c.call_count(), 3);

        let empty = ScriptedCollaborator::new("empty");
        let err = empty.invoke(&StageInputs::new()).await.unwrap_err();
        assert!(err.message.contains("exhausted"));
    }

    #[tokio::test]
    async fn test_slow_collaborator_waits() {
        let c = SlowCollaborator::new("slow", Duration::from_millis(10));
        let start = std::time::Instant::now();
        c.invoke(&StageInputs::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_recording_collaborator_keeps_inputs() {
        let recorder = RecordingCollaborator::new("recorder");
        recorder
            .invoke(&StageInputs::new().with("b", b"2".to_vec()).with("a", b"1".to_vec()))
            .await
            .unwrap();
        assert_eq!(recorder.seen_names(), [vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(recorder.last_payload("b"), Some(b"2".to_vec()));
    }

    #[tokio::test]
    async fn test_failing_put_store() {
        let store = FailingPutStore::new("bad");
        let run = RunId::parse("r").unwrap();
        store.begin_run(&run).await.unwrap();
        assert!(store.put(&run, "good", b"1", "s").await.is_ok());
        assert!(store.put(&run, "bad", b"1", "s").await.is_err());
    }
}
