//! Deferred workloads and the patch dispatcher.
//!
//! While the executor walks the operation it snapshots every `@defer`red
//! fragment and every trailing `@stream` element as a [`DeferredWorkload`]
//! and hands it to the [`PatchDispatcher`]. Nothing resolves at that point:
//! the dispatcher owns the asynchronous computations and the completion
//! promises, and only draining the [`Patches`] stream polls them.
//!
//! Workloads are grouped by label. All `@defer` workloads sharing a label
//! aggregate into a single payload: their data trees merge along their
//! paths and the emitted path is the longest common prefix. `@stream`
//! workloads emit one payload per list element, each carrying the element's
//! indexed path. Workloads discovered *during* another workload's resolution
//! (a nested `@defer`, a `@stream` inside a deferred fragment) register as
//! children of the outer unit and run to completion before the outer unit
//! signals, so nested patches are always emitted before their parent label.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

use async_graphql_parser::types::SelectionSet;
use async_graphql_parser::Positioned;
use async_graphql_value::{ConstValue, Name};
use futures::channel::oneshot;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, Stream};
use indexmap::IndexMap;
use query_path::{QueryPath, QueryPathSegment};

use crate::error::ServerError;
use crate::registry::MetaFieldType;
use crate::response::IncrementalPayload;

/// A unit of deferred work: one `@defer` site or one `@stream`ed list
/// element, snapshotted at the point the executor encountered it.
pub(crate) struct DeferredWorkload {
    pub label: String,
    pub kind: WorkloadKind,
    /// Response path the resulting patch merges at. For a stream element
    /// this ends in the element's list index.
    pub path: QueryPath,
    pub parent_type_name: String,
    /// For `@defer`, the container value the fragment was spread on; for
    /// `@stream`, the raw list element.
    pub parent_value: ConstValue,
    pub selection_set: Positioned<SelectionSet>,
}

#[derive(Clone)]
pub(crate) enum WorkloadKind {
    Defer,
    StreamElement { element_type: MetaFieldType },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LabelKind {
    Defer,
    Stream,
}

impl WorkloadKind {
    fn label_kind(&self) -> LabelKind {
        match self {
            WorkloadKind::Defer => LabelKind::Defer,
            WorkloadKind::StreamElement { .. } => LabelKind::Stream,
        }
    }
}

/// What a finished workload hands back to the dispatcher.
struct CompletedWorkload {
    path: QueryPath,
    data: ConstValue,
    errors: Vec<ServerError>,
}

/// Runs one workload to completion, returning its data tree and the errors
/// that surfaced along the way. Installed by the executor; keeps the
/// dispatcher free of any knowledge of field resolution.
pub(crate) type WorkloadExecutor = Arc<
    dyn Fn(DeferredWorkload, PatchDispatcher) -> BoxFuture<'static, (ConstValue, Vec<ServerError>)>
        + Send
        + Sync,
>;

#[derive(Default)]
struct DispatcherInner {
    /// Completion signal per unit: `resolvers[label][path_key]`.
    resolvers: HashMap<String, HashMap<String, oneshot::Sender<CompletedWorkload>>>,
    /// Pending completion promises per label, in enqueue order. Drained by
    /// the [`Patches`] stream.
    siblings: HashMap<String, Vec<oneshot::Receiver<CompletedWorkload>>>,
    /// Workloads registered during a parent unit's resolution, not yet
    /// begun: `children[parent_label][parent_path_key]`.
    children: HashMap<String, HashMap<String, Vec<DeferredWorkload>>>,
    /// (child label, parent label) edges, recorded at registration.
    parent_edges: Vec<(String, String)>,
    /// Labels in first-registration order.
    label_log: Vec<(String, LabelKind)>,
    known_labels: HashSet<String>,
    /// Dispatched unit computations awaiting their first poll.
    running: Vec<BoxFuture<'static, ()>>,
    non_empty: bool,
    fatal: Option<ServerError>,
}

/// Owns every deferred unit of one execution. Cheap to clone; all clones
/// share state.
#[derive(Clone)]
pub(crate) struct PatchDispatcher {
    inner: Arc<Mutex<DispatcherInner>>,
    executor: WorkloadExecutor,
}

impl PatchDispatcher {
    pub fn new(executor: WorkloadExecutor) -> Self {
        PatchDispatcher {
            inner: Arc::new(Mutex::new(DispatcherInner::default())),
            executor,
        }
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherInner> {
        self.inner.lock().expect("dispatcher state poisoned")
    }

    /// Begins a unit's resolution: installs its completion promise and
    /// queues its computation. The computation is only polled once the
    /// consumer drains [`Patches`].
    pub fn dispatch(&self, workload: DeferredWorkload) {
        let mut inner = self.lock();
        inner.non_empty = true;
        register_unit(&mut inner, &workload);
        let future = self.workload_future(workload);
        inner.running.push(future);
    }

    /// Stores a unit without beginning its resolution; it is driven once the
    /// unit identified by `(parent_label, parent_path_key)` completes.
    pub fn register_child(
        &self,
        workload: DeferredWorkload,
        parent_label: &str,
        parent_path_key: &str,
    ) {
        let mut inner = self.lock();
        if !inner.known_labels.contains(parent_label) {
            tracing::error!(
                parent_label,
                child_label = %workload.label,
                "deferred workload registered under an unknown label"
            );
            inner.fatal = Some(ServerError::new(
                "Internal error: deferred workload registered under an unknown label.",
                None,
            ));
            return;
        }
        inner
            .parent_edges
            .push((workload.label.clone(), parent_label.to_owned()));
        inner
            .children
            .entry(parent_label.to_owned())
            .or_default()
            .entry(parent_path_key.to_owned())
            .or_default()
            .push(workload);
    }

    /// The lazy patch sequence: `Ok(None)` if nothing was ever deferred,
    /// `Err` if the dispatcher hit a fatal inconsistency, in which case the
    /// operation aborts with that single error and no patches.
    pub fn into_patches(self) -> Result<Option<Patches>, ServerError> {
        {
            let mut inner = self.lock();
            if let Some(fatal) = inner.fatal.take() {
                inner.running.clear();
                inner.children.clear();
                return Err(fatal);
            }
            if !inner.non_empty {
                return Ok(None);
            }
        }
        Ok(Some(Patches {
            inner: self.inner,
            driver: FuturesUnordered::new(),
            labels: IndexMap::new(),
            parents: HashMap::new(),
            ready: VecDeque::new(),
            fatal: false,
        }))
    }

    fn workload_future(&self, workload: DeferredWorkload) -> BoxFuture<'static, ()> {
        let dispatcher = self.clone();
        Box::pin(async move {
            let label = workload.label.clone();
            let path = workload.path.clone();
            let path_key = path.key();
            tracing::debug!(%label, path = %path, "resolving deferred workload");

            let (data, errors) = (dispatcher.executor)(workload, dispatcher.clone()).await;

            // Children discovered during resolution run to completion before
            // this unit signals: nested patches emit before their parent.
            let children = {
                let mut inner = dispatcher.lock();
                inner
                    .children
                    .get_mut(&label)
                    .and_then(|per_path| per_path.remove(&path_key))
                    .unwrap_or_default()
            };
            for child in children {
                {
                    let mut inner = dispatcher.lock();
                    register_unit(&mut inner, &child);
                }
                dispatcher.workload_future(child).await;
            }

            let sender = {
                let mut inner = dispatcher.lock();
                inner
                    .resolvers
                    .get_mut(&label)
                    .and_then(|per_path| per_path.remove(&path_key))
            };
            match sender {
                Some(sender) => {
                    let _ = sender.send(CompletedWorkload { path, data, errors });
                }
                None => tracing::warn!(%label, "completed workload had no resolver installed"),
            }
        })
    }
}

fn register_unit(inner: &mut DispatcherInner, workload: &DeferredWorkload) {
    if inner.known_labels.insert(workload.label.clone()) {
        inner
            .label_log
            .push((workload.label.clone(), workload.kind.label_kind()));
    }
    let (sender, receiver) = oneshot::channel();
    inner
        .resolvers
        .entry(workload.label.clone())
        .or_default()
        .insert(workload.path.key(), sender);
    inner
        .siblings
        .entry(workload.label.clone())
        .or_default()
        .push(receiver);
}

/// Routes new workloads to the dispatcher. In the initial traversal a
/// workload starts immediately; inside a deferred workload it registers as a
/// child of the enclosing unit.
#[derive(Clone)]
pub(crate) struct DeferredWorkloadSender {
    dispatcher: PatchDispatcher,
    /// `(label, path key)` of the unit currently resolving, if any.
    scope: Option<(String, String)>,
}

impl DeferredWorkloadSender {
    pub fn new(dispatcher: PatchDispatcher) -> Self {
        DeferredWorkloadSender {
            dispatcher,
            scope: None,
        }
    }

    pub fn scoped(dispatcher: PatchDispatcher, label: String, path_key: String) -> Self {
        DeferredWorkloadSender {
            dispatcher,
            scope: Some((label, path_key)),
        }
    }

    pub fn send(&self, workload: DeferredWorkload) {
        match &self.scope {
            None => self.dispatcher.dispatch(workload),
            Some((label, path_key)) => self.dispatcher.register_child(workload, label, path_key),
        }
    }
}

struct Slot {
    receiver: Option<oneshot::Receiver<CompletedWorkload>>,
    completed: Option<CompletedWorkload>,
}

struct LabelState {
    kind: LabelKind,
    /// One slot per unit, in enqueue order.
    slots: Vec<Slot>,
    emitted: bool,
}

impl LabelState {
    fn resolved(&self) -> bool {
        self.slots.iter().all(|slot| slot.receiver.is_none())
    }
}

/// The lazy, ordered sequence of incremental payloads.
///
/// Draining this stream is what drives deferred resolution; dropping it
/// mid-way discards all remaining work. Payloads are emitted in the
/// completion order of each label's aggregate, nested labels strictly before
/// the label that spawned them.
pub struct Patches {
    inner: Arc<Mutex<DispatcherInner>>,
    driver: FuturesUnordered<BoxFuture<'static, ()>>,
    labels: IndexMap<String, LabelState>,
    /// child label -> labels whose units spawned it.
    parents: HashMap<String, HashSet<String>>,
    ready: VecDeque<IncrementalPayload>,
    fatal: bool,
}

impl Patches {
    /// Pulls newly dispatched computations and completion promises out of
    /// the shared dispatcher state.
    fn sync(&mut self) {
        let mut inner = self.inner.lock().expect("dispatcher state poisoned");
        for future in inner.running.drain(..) {
            self.driver.push(future);
        }
        let label_log = std::mem::take(&mut inner.label_log);
        for (label, kind) in label_log {
            self.labels.entry(label).or_insert_with(|| LabelState {
                kind,
                slots: Vec::new(),
                emitted: false,
            });
        }
        for (label, receivers) in inner.siblings.iter_mut() {
            if receivers.is_empty() {
                continue;
            }
            let state = self
                .labels
                .get_mut(label)
                .expect("labels are logged before their promises");
            state.slots.extend(receivers.drain(..).map(|receiver| Slot {
                receiver: Some(receiver),
                completed: None,
            }));
        }
        let edges = std::mem::take(&mut inner.parent_edges);
        for (child, parent) in edges {
            self.parents.entry(child).or_default().insert(parent);
        }
        if inner.fatal.is_some() {
            self.fatal = true;
        }
    }

    /// A label is closed once every unit it could ever contain has
    /// resolved: all its promises are settled and so are the labels whose
    /// units might still register more of it.
    fn label_closed(&self, label: &str, visiting: &mut HashSet<String>) -> bool {
        if !visiting.insert(label.to_owned()) {
            // Lexical nesting cannot cycle; bail out rather than loop.
            return true;
        }
        let Some(state) = self.labels.get(label) else {
            return false;
        };
        state.resolved()
            && self
                .parents
                .get(label)
                .into_iter()
                .flatten()
                .all(|parent| self.label_closed(parent, visiting))
    }

    /// Nesting depth of a label, via the parent edges. Deeper labels emit
    /// first when several close in the same poll.
    fn label_depth(&self, label: &str, visiting: &mut HashSet<String>) -> usize {
        if !visiting.insert(label.to_owned()) {
            return 0;
        }
        self.parents
            .get(label)
            .into_iter()
            .flatten()
            .map(|parent| 1 + self.label_depth(parent, visiting))
            .max()
            .unwrap_or(0)
    }

    fn emit_closed_defers(&mut self) {
        let mut closed: Vec<(String, usize)> = Vec::new();
        for (label, state) in &self.labels {
            if state.kind != LabelKind::Defer || state.emitted {
                continue;
            }
            if self.label_closed(label, &mut HashSet::new()) {
                let depth = self.label_depth(label, &mut HashSet::new());
                closed.push((label.clone(), depth));
            }
        }
        closed.sort_by(|a, b| b.1.cmp(&a.1));

        for (label, _) in closed {
            let state = self.labels.get_mut(&label).expect("label just seen");
            state.emitted = true;
            let completed: Vec<CompletedWorkload> = state
                .slots
                .iter_mut()
                .filter_map(|slot| slot.completed.take())
                .collect();
            if completed.is_empty() {
                continue;
            }
            tracing::debug!(%label, units = completed.len(), "emitting deferred patch");
            self.ready.push_back(aggregate_payload(label, completed));
        }
    }

    fn finished(&self) -> bool {
        self.driver.is_empty()
            && self.labels.values().all(|state| {
                state.resolved() && (state.kind == LabelKind::Stream || state.emitted)
            })
    }
}

impl Drop for Patches {
    fn drop(&mut self) {
        // Undispatched computations hold the dispatcher state alive through
        // their own `PatchDispatcher` clones; dropping them here breaks the
        // cycle when the consumer abandons the sequence early.
        let mut inner = self.inner.lock().expect("dispatcher state poisoned");
        inner.running.clear();
        inner.children.clear();
        inner.resolvers.clear();
    }
}

impl Stream for Patches {
    type Item = IncrementalPayload;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            if let Some(payload) = this.ready.pop_front() {
                return Poll::Ready(Some(payload));
            }

            this.sync();
            if this.fatal {
                return Poll::Ready(None);
            }

            let mut progressed = false;
            while let Poll::Ready(Some(())) = Pin::new(&mut this.driver).poll_next(cx) {
                progressed = true;
            }

            // Completed computations may have registered new labels and
            // promises; pick those up before settling the slots.
            this.sync();

            for (label, state) in this.labels.iter_mut() {
                for slot in state.slots.iter_mut() {
                    let Some(receiver) = slot.receiver.as_mut() else {
                        continue;
                    };
                    match Pin::new(receiver).poll(cx) {
                        Poll::Ready(Ok(completed)) => {
                            slot.receiver = None;
                            progressed = true;
                            if state.kind == LabelKind::Stream {
                                // Stream elements patch independently, each
                                // at its own indexed path.
                                this.ready.push_back(IncrementalPayload {
                                    label: label.clone(),
                                    data: completed.data,
                                    path: completed.path,
                                    errors: completed.errors,
                                });
                            } else {
                                slot.completed = Some(completed);
                            }
                        }
                        Poll::Ready(Err(oneshot::Canceled)) => {
                            slot.receiver = None;
                            progressed = true;
                            tracing::warn!(%label, "deferred workload dropped before completing");
                        }
                        Poll::Pending => {}
                    }
                }
            }

            this.emit_closed_defers();

            if !this.ready.is_empty() {
                continue;
            }
            if this.finished() {
                return Poll::Ready(None);
            }
            if !progressed {
                return Poll::Pending;
            }
        }
    }
}

fn aggregate_payload(label: String, completed: Vec<CompletedWorkload>) -> IncrementalPayload {
    let mut paths = completed.iter().map(|unit| &unit.path);
    let first = paths.next().expect("at least one completed unit").clone();
    let prefix = paths.fold(first, |prefix, path| prefix.common_prefix(path));
    let prefix_len = prefix.len();

    let mut data = ConstValue::Null;
    let mut errors = Vec::new();
    for unit in completed {
        let relative: Vec<QueryPathSegment> = unit
            .path
            .segments()
            .into_iter()
            .skip(prefix_len)
            .cloned()
            .collect();
        apply_patch(&mut data, &relative, unit.data);
        errors.extend(unit.errors);
    }

    IncrementalPayload {
        label,
        data,
        path: prefix,
        errors,
    }
}

/// Merges `data` into `acc` at `path`, creating intermediate objects and
/// lists as needed. At the leaf, objects shallow-merge with the patch fields
/// overriding; anything else is overwritten.
pub(crate) fn apply_patch(acc: &mut ConstValue, path: &[QueryPathSegment], data: ConstValue) {
    match path.split_first() {
        None => match (&mut *acc, data) {
            (ConstValue::Object(target), ConstValue::Object(fields)) => {
                for (name, value) in fields {
                    target.insert(name, value);
                }
            }
            (slot, data) => *slot = data,
        },
        Some((QueryPathSegment::Field(name), rest)) => {
            if !matches!(acc, ConstValue::Object(_)) {
                *acc = ConstValue::Object(IndexMap::new());
            }
            let ConstValue::Object(target) = acc else {
                unreachable!()
            };
            let entry = target
                .entry(Name::new(&**name))
                .or_insert(ConstValue::Null);
            apply_patch(entry, rest, data);
        }
        Some((QueryPathSegment::Index(index), rest)) => {
            if !matches!(acc, ConstValue::List(_)) {
                *acc = ConstValue::List(Vec::new());
            }
            let ConstValue::List(items) = acc else {
                unreachable!()
            };
            while items.len() <= *index {
                items.push(ConstValue::Null);
            }
            apply_patch(&mut items[*index], rest, data);
        }
    }
}
