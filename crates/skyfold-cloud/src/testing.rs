//! In-memory test doubles for the remote services
//!
//! Enabled for this crate's own tests and, through the `test-utils`
//! feature, for dependent crates' tests.

use crate::capability::{ResourceSku, SkuSource};
use crate::client::{AsyncResult, OperationState, PendingOperation, ResourceClient, TagsClient};
use crate::error::{CloudError, Result};
use crate::executor::Progress;
use crate::orchestrator::Reconciler;
use crate::spec::ResourceRef;
use crate::tags::Tags;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared, ordered log of `"<call>:<service>"` entries
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        lock(&self.0).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Drain the log
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.0))
    }
}

/// Reconciler that records its calls and replays scripted results.
///
/// With nothing scripted, every call returns `Ok(Progress::Done)`.
pub struct RecordingReconciler {
    name: String,
    log: CallLog,
    calls: AtomicUsize,
    reconcile_results: Mutex<VecDeque<Result<Progress>>>,
    delete_results: Mutex<VecDeque<Result<Progress>>>,
}

impl RecordingReconciler {
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            calls: AtomicUsize::new(0),
            reconcile_results: Mutex::new(VecDeque::new()),
            delete_results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn script_reconcile(&self, result: Result<Progress>) {
        lock(&self.reconcile_results).push_back(result);
    }

    pub fn script_delete(&self, result: Result<Progress>) {
        lock(&self.delete_results).push_back(result);
    }

    /// Total reconcile and delete calls
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reconciler for RecordingReconciler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn reconcile(&self) -> Result<Progress> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("reconcile:{}", self.name));
        lock(&self.reconcile_results)
            .pop_front()
            .unwrap_or(Ok(Progress::Done))
    }

    async fn delete(&self) -> Result<Progress> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.push(format!("delete:{}", self.name));
        lock(&self.delete_results)
            .pop_front()
            .unwrap_or(Ok(Progress::Done))
    }
}

/// Call observed by [`FakeResourceClient`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Get(String),
    CreateOrUpdate(String),
    Delete(String),
    Poll(String),
}

enum PendingEffect<R> {
    Put(ResourceRef, R),
    Remove(ResourceRef),
}

struct InFlight<R> {
    effect: PendingEffect<R>,
    polls_left: usize,
}

struct FakeState<R> {
    resources: HashMap<(String, String), R>,
    in_flight: HashMap<String, InFlight<R>>,
    calls: Vec<RemoteCall>,
    next_token: usize,
    complete_after_polls: usize,
    retry_after: Option<Duration>,
    failure: Option<String>,
    next_poll_error: Option<CloudError>,
    next_create_error: Option<CloudError>,
    hang_polls: bool,
}

/// In-memory remote resource service.
///
/// Operations complete immediately unless [`complete_after_polls`] is set,
/// in which case create/update and delete return a token and take effect on
/// the n-th poll.
///
/// [`complete_after_polls`]: FakeResourceClient::complete_after_polls
pub struct FakeResourceClient<R> {
    state: Mutex<FakeState<R>>,
}

impl<R: Clone + Send + Sync + 'static> Default for FakeResourceClient<R> {
    fn default() -> Self {
        Self::new()
    }
}

fn key(reference: &ResourceRef) -> (String, String) {
    (reference.resource_group.clone(), reference.name.clone())
}

impl<R: Clone + Send + Sync + 'static> FakeResourceClient<R> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                resources: HashMap::new(),
                in_flight: HashMap::new(),
                calls: Vec::new(),
                next_token: 0,
                complete_after_polls: 0,
                retry_after: None,
                failure: None,
                next_poll_error: None,
                next_create_error: None,
                hang_polls: false,
            }),
        }
    }

    pub fn insert(&self, resource_group: &str, name: &str, resource: R) {
        lock(&self.state)
            .resources
            .insert((resource_group.to_string(), name.to_string()), resource);
    }

    /// Current remote state of the resource called `name`, in any group
    pub fn resource(&self, name: &str) -> Option<R> {
        lock(&self.state)
            .resources
            .iter()
            .find(|((_, n), _)| n == name)
            .map(|(_, r)| r.clone())
    }

    pub fn complete_after_polls(&self, polls: usize) {
        lock(&self.state).complete_after_polls = polls;
    }

    pub fn set_retry_after(&self, retry_after: Duration) {
        lock(&self.state).retry_after = Some(retry_after);
    }

    /// Long-running operations end in a provider-reported failure
    pub fn fail_operations_with(&self, message: &str) {
        lock(&self.state).failure = Some(message.to_string());
    }

    pub fn fail_next_poll(&self, error: CloudError) {
        lock(&self.state).next_poll_error = Some(error);
    }

    pub fn fail_next_create(&self, error: CloudError) {
        lock(&self.state).next_create_error = Some(error);
    }

    /// Polls never answer while set
    pub fn hang_polls(&self, hang: bool) {
        lock(&self.state).hang_polls = hang;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        lock(&self.state).calls.clone()
    }

    pub fn count(&self, predicate: impl Fn(&RemoteCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| predicate(c)).count()
    }

    /// Create/update and delete requests issued so far
    pub fn mutation_count(&self) -> usize {
        self.count(|c| matches!(c, RemoteCall::CreateOrUpdate(_) | RemoteCall::Delete(_)))
    }

    fn start(state: &mut FakeState<R>, effect: PendingEffect<R>) -> PendingOperation {
        state.next_token += 1;
        let token = format!("op-{}", state.next_token);
        state.in_flight.insert(
            token.clone(),
            InFlight {
                effect,
                polls_left: state.complete_after_polls,
            },
        );
        let pending = PendingOperation::new(token);
        match state.retry_after {
            Some(retry_after) => pending.with_retry_after(retry_after),
            None => pending,
        }
    }

    fn apply(state: &mut FakeState<R>, effect: PendingEffect<R>) {
        match effect {
            PendingEffect::Put(reference, resource) => {
                state.resources.insert(key(&reference), resource);
            }
            PendingEffect::Remove(reference) => {
                state.resources.remove(&key(&reference));
                state.in_flight.retain(|_, op| match &op.effect {
                    PendingEffect::Put(r, _) => key(r) != key(&reference),
                    PendingEffect::Remove(_) => true,
                });
            }
        }
    }
}

#[async_trait]
impl<R: Clone + Send + Sync + 'static> ResourceClient for FakeResourceClient<R> {
    type Resource = R;

    async fn get(&self, reference: &ResourceRef) -> Result<Option<R>> {
        let mut state = lock(&self.state);
        state.calls.push(RemoteCall::Get(reference.to_string()));
        Ok(state.resources.get(&key(reference)).cloned())
    }

    async fn create_or_update_async(
        &self,
        reference: &ResourceRef,
        parameters: R,
    ) -> Result<AsyncResult<R>> {
        let mut state = lock(&self.state);
        state
            .calls
            .push(RemoteCall::CreateOrUpdate(reference.to_string()));
        if let Some(error) = state.next_create_error.take() {
            return Err(error);
        }

        if state.complete_after_polls == 0 {
            state.resources.insert(key(reference), parameters.clone());
            return Ok(AsyncResult::Completed(parameters));
        }
        let pending = Self::start(
            &mut state,
            PendingEffect::Put(reference.clone(), parameters),
        );
        Ok(AsyncResult::Pending(pending))
    }

    async fn delete_async(&self, reference: &ResourceRef) -> Result<AsyncResult<()>> {
        let mut state = lock(&self.state);
        state.calls.push(RemoteCall::Delete(reference.to_string()));

        let provisioning = state.in_flight.values().any(|op| match &op.effect {
            PendingEffect::Put(r, _) => key(r) == key(reference),
            PendingEffect::Remove(_) => false,
        });
        if !state.resources.contains_key(&key(reference)) && !provisioning {
            return Err(CloudError::ResourceNotFound(reference.to_string()));
        }

        if state.complete_after_polls == 0 {
            Self::apply(&mut state, PendingEffect::Remove(reference.clone()));
            return Ok(AsyncResult::Completed(()));
        }
        let pending = Self::start(&mut state, PendingEffect::Remove(reference.clone()));
        Ok(AsyncResult::Pending(pending))
    }

    async fn poll(&self, operation: &PendingOperation) -> Result<OperationState> {
        let hang = {
            let mut state = lock(&self.state);
            state.calls.push(RemoteCall::Poll(operation.token.clone()));
            state.hang_polls
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = lock(&self.state);
        if let Some(error) = state.next_poll_error.take() {
            return Err(error);
        }

        let Some(in_flight) = state.in_flight.get_mut(&operation.token) else {
            return Err(CloudError::InvalidToken(format!(
                "unknown operation {}",
                operation.token
            )));
        };
        in_flight.polls_left = in_flight.polls_left.saturating_sub(1);
        if in_flight.polls_left > 0 {
            return Ok(OperationState::Pending);
        }

        let Some(done) = state.in_flight.remove(&operation.token) else {
            return Ok(OperationState::Pending);
        };
        if let Some(message) = state.failure.clone() {
            return Ok(OperationState::Failed(message));
        }
        Self::apply(&mut state, done.effect);
        Ok(OperationState::Succeeded)
    }
}

/// SKU listing served from memory, counting fetches
#[derive(Default)]
pub struct FakeSkuSource {
    skus: Mutex<HashMap<String, Vec<ResourceSku>>>,
    next_error: Mutex<Option<CloudError>>,
    fetches: AtomicUsize,
}

impl FakeSkuSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_skus(&self, location: &str, skus: Vec<ResourceSku>) {
        lock(&self.skus).insert(location.to_string(), skus);
    }

    pub fn fail_next(&self, error: CloudError) {
        *lock(&self.next_error) = Some(error);
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SkuSource for FakeSkuSource {
    async fn list_skus(&self, location: &str) -> Result<Vec<ResourceSku>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.next_error).take() {
            return Err(error);
        }
        Ok(lock(&self.skus).get(location).cloned().unwrap_or_default())
    }
}

/// Tag API served from memory, keyed by scope
#[derive(Default)]
pub struct FakeTagsClient {
    tags: Mutex<HashMap<String, Tags>>,
    updates: Mutex<Vec<(String, Tags)>>,
}

impl FakeTagsClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, scope: &str, tags: Tags) {
        lock(&self.tags).insert(scope.to_string(), tags);
    }

    pub fn tags(&self, scope: &str) -> Option<Tags> {
        lock(&self.tags).get(scope).cloned()
    }

    pub fn remove(&self, scope: &str) {
        lock(&self.tags).remove(scope);
    }

    /// Every `update_at_scope` call, in order
    pub fn updates(&self) -> Vec<(String, Tags)> {
        lock(&self.updates).clone()
    }
}

#[async_trait]
impl TagsClient for FakeTagsClient {
    async fn get_at_scope(&self, scope: &str) -> Result<Option<Tags>> {
        Ok(lock(&self.tags).get(scope).cloned())
    }

    async fn update_at_scope(&self, scope: &str, tags: Tags) -> Result<()> {
        lock(&self.updates).push((scope.to_string(), tags.clone()));
        lock(&self.tags).insert(scope.to_string(), tags);
        Ok(())
    }
}
