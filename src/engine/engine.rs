//! SaveChatEngine: the attach pipeline and its background tasks
//!
//! Pipeline per candidate host: claim → classify → wait for readiness →
//! locate tray (bounded) or synthesize one → attach → start session.
//! Background tasks: the root observer, which discovers new candidates and
//! sweeps disconnected sessions, and the navigation watcher.

use super::attach::{logical_container, AttachOutcome, Attacher};
use super::cancel::CancellationToken;
use super::classify::{Classifier, Signal};
use super::discover::discover;
use super::error::EngineError;
use super::events::{EngineEvent, HealOutcome, TerminationReason, TraySource};
use super::locate::{locate, synthesize_tray};
use super::markers::{is_assistant_marked, is_content_region};
use super::navigation::watch_navigation;
use super::reconcile::{Reconciler, SessionRegistry};
use super::schedule::{poll, wait_until_ready, AbandonReason, Abandoned, Polled, WaitOutcome};
use crate::config::EngineConfig;
use crate::dom::{
    Document, DomError, DomResult, MutationObserver, MutationRecord, NodeId, NodeKind,
    ObserveOptions, Tree, AUTHOR_ROLE_ATTR,
};
use crate::store::ResponseStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinSet;

/// What the pipeline did with one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// A control was inserted and a session started
    Attached { button: NodeId, source: TraySource },
    /// The host already carried a control; a session was started for it
    AlreadyPresent { button: NodeId },
    /// The host, an ancestor or a descendant is already being handled
    AlreadyWatched,
    /// The host does not classify as an assistant message
    NotAssistant(Signal),
    /// Readiness or tray wait gave up
    Abandoned(Abandoned),
    /// The tree changed under the pipeline
    Failed(DomError),
    /// Teardown or shutdown happened while the pipeline was running
    Cancelled,
}

/// Summary of one scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub candidates: usize,
    pub attached: usize,
    pub already_present: usize,
    pub abandoned: usize,
}

struct Shared {
    document: Arc<Document>,
    config: EngineConfig,
    classifier: Classifier,
    reconciler: Reconciler,
    attacher: Attacher,
    events: broadcast::Sender<EngineEvent>,
    shutdown: CancellationToken,
    /// Shared by every pipeline started since the last teardown
    pipelines: Mutex<CancellationToken>,
    /// Raised by the root observer so the navigation watcher re-reads the
    /// conversation identity
    identity_check: Notify,
    started: AtomicBool,
}

/// Attaches save controls to assistant messages and keeps them attached.
#[derive(Clone)]
pub struct SaveChatEngine {
    shared: Arc<Shared>,
}

impl SaveChatEngine {
    pub fn new(
        document: Arc<Document>,
        store: Arc<dyn ResponseStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let (events, _) = broadcast::channel(config.event_capacity);
        let classifier = Classifier::new(config.min_text_chars);
        let attacher = Attacher::new(
            document.clone(),
            store,
            events.clone(),
            config.revert_delay(),
        );
        let reconciler = Reconciler::new(
            document.clone(),
            attacher.clone(),
            classifier.clone(),
            Arc::new(SessionRegistry::new()),
            events.clone(),
        );
        Ok(Self {
            shared: Arc::new(Shared {
                document,
                config,
                classifier,
                reconciler,
                attacher,
                events,
                shutdown: CancellationToken::new(),
                pipelines: Mutex::new(CancellationToken::new()),
                identity_check: Notify::new(),
                started: AtomicBool::new(false),
            }),
        })
    }

    pub fn document(&self) -> &Arc<Document> {
        &self.shared.document
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        self.shared.reconciler.registry()
    }

    pub fn attacher(&self) -> &Attacher {
        &self.shared.attacher
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.shared.events.subscribe()
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        let _ = self.shared.events.send(event);
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shared.shutdown.clone()
    }

    pub(crate) fn identity_check(&self) -> &Notify {
        &self.shared.identity_check
    }

    fn pipeline_generation(&self) -> CancellationToken {
        self.shared
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Cancel every pipeline in flight. Pipelines started afterwards get a
    /// fresh token.
    fn cancel_pipelines(&self) {
        let previous = std::mem::take(
            &mut *self
                .shared
                .pipelines
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        previous.cancel();
    }

    /// Begin observing the page, then scan what is already there.
    pub async fn start(&self) -> Result<ScanReport, EngineError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(EngineError::AlreadyStarted);
        }
        let document = &self.shared.document;
        let observer = document.observe(
            document.body(),
            ObserveOptions::subtree()
                .with_attributes(&[AUTHOR_ROLE_ATTR, "class"])
                .with_character_data(),
        );
        tokio::spawn(self.clone().run_root_observer(observer));
        tokio::spawn(watch_navigation(self.clone(), document.subscribe_location()));

        self.wait_for_page().await;
        let report = self.scan().await;
        tracing::info!(
            attached = report.attached,
            candidates = report.candidates,
            "engine started"
        );
        Ok(report)
    }

    async fn run_root_observer(self, mut observer: MutationObserver) {
        let shutdown = self.shutdown_token();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                batch = observer.next_batch() => {
                    let Some(records) = batch else { break };
                    if shutdown.is_cancelled() {
                        break;
                    }
                    self.handle_mutations(&records);
                    self.shared.identity_check.notify_one();
                }
            }
        }
        self.shared.document.disconnect(observer.id());
        tracing::debug!("root observer stopped");
    }

    /// Sweep disconnected sessions, then start pipelines for new
    /// candidates touched by `records`, in delivery order. Returns the
    /// number of pipelines started.
    pub fn handle_mutations(&self, records: &[MutationRecord]) -> usize {
        self.shared.reconciler.sweep();

        let registry = self.registry();
        let candidates = self.shared.document.read(|tree| {
            let mut out: Vec<NodeId> = Vec::new();
            for scope in records.iter().flat_map(|r| scopes(tree, r)) {
                for host in discover(tree, scope, &self.shared.classifier) {
                    if !out.contains(&host) && !registry.covers(tree, host) {
                        out.push(host);
                    }
                }
            }
            out
        });
        for host in &candidates {
            let engine = self.clone();
            let host = *host;
            tokio::spawn(async move { engine.process(host).await });
        }
        candidates.len()
    }

    /// Poll until the page shows a chat container or message markup.
    /// Returns false when the ceiling was reached; callers proceed anyway.
    pub async fn wait_for_page(&self) -> bool {
        let document = &self.shared.document;
        let body = document.body();
        match poll(document, body, &self.shared.config.page_ready, |tree, _| {
            page_has_chat(tree).then_some(())
        })
        .await
        {
            Polled::Ready(()) => true,
            Polled::Abandoned(a) => {
                tracing::debug!(attempts = a.attempts, "chat container not found, scanning anyway");
                false
            }
        }
    }

    /// Discover candidates in the whole body and run their pipelines.
    pub async fn scan(&self) -> ScanReport {
        let document = &self.shared.document;
        let body = document.body();
        let candidates = document.read(|tree| discover(tree, body, &self.shared.classifier));
        let mut report = ScanReport {
            candidates: candidates.len(),
            ..Default::default()
        };

        let mut pipelines = JoinSet::new();
        for host in candidates {
            let engine = self.clone();
            pipelines.spawn(async move { engine.process(host).await });
        }
        while let Some(joined) = pipelines.join_next().await {
            match joined {
                Ok(ProcessOutcome::Attached { .. }) => report.attached += 1,
                Ok(ProcessOutcome::AlreadyPresent { .. }) => report.already_present += 1,
                Ok(ProcessOutcome::Abandoned(_)) => report.abandoned += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "pipeline task failed"),
            }
        }
        tracing::debug!(?report, "scan complete");
        report
    }

    /// Run the attach pipeline for one candidate host.
    ///
    /// A teardown or shutdown while the pipeline waits ends it with
    /// `Cancelled`; no session is left behind for it.
    pub async fn process(&self, host: NodeId) -> ProcessOutcome {
        let generation = self.pipeline_generation();
        if self.shared.shutdown.is_cancelled() {
            return ProcessOutcome::Cancelled;
        }
        let shared = &self.shared;
        let registry = self.registry();

        if shared.document.read(|tree| registry.covers(tree, host)) {
            return ProcessOutcome::AlreadyWatched;
        }
        let Some(_claim) = registry.begin_preparing(host) else {
            return ProcessOutcome::AlreadyWatched;
        };

        let prepared = tokio::select! {
            biased;
            _ = generation.cancelled() => None,
            prepared = self.prepare(host) => Some(prepared),
        };
        let (point, source) = match prepared {
            None => return self.cancelled(host),
            Some(Ok(found)) => found,
            Some(Err(outcome)) => return outcome,
        };
        if generation.is_cancelled() {
            return self.cancelled(host);
        }

        let outcome = match shared.attacher.attach(host, point) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!(%host, error = %e, "attach failed");
                return ProcessOutcome::Failed(e);
            }
        };
        shared.reconciler.start_session(host);
        if generation.is_cancelled() {
            // Torn down between the check above and the registry insert
            shared.reconciler.terminate(host, self.cancel_reason());
            return self.cancelled(host);
        }

        match outcome {
            AttachOutcome::Inserted { button, .. } => {
                tracing::info!(%host, %button, %source, "save control attached");
                self.emit(EngineEvent::AffordanceAttached {
                    host,
                    button,
                    source,
                });
                ProcessOutcome::Attached { button, source }
            }
            AttachOutcome::AlreadyPresent { button } => ProcessOutcome::AlreadyPresent { button },
        }
    }

    /// Classify, wait for readiness and resolve an attachment point.
    async fn prepare(&self, host: NodeId) -> Result<(NodeId, TraySource), ProcessOutcome> {
        let shared = &self.shared;
        let document = &shared.document;

        self.confirm(host).map_err(ProcessOutcome::NotAssistant)?;
        if let WaitOutcome::Abandoned(abandoned) = wait_until_ready(
            document,
            host,
            shared.config.min_text_chars,
            &shared.config.readiness,
        )
        .await
        {
            return Err(self.abandon(host, abandoned));
        }
        // Re-rendered while we waited
        self.confirm(host).map_err(ProcessOutcome::NotAssistant)?;

        let located = poll(document, host, &shared.config.tray_wait, |tree, host| {
            tree.element(host).and_then(|h| locate(&h))
        })
        .await;
        match located {
            Polled::Ready(found) => Ok((found.point, TraySource::Located(found.strategy))),
            Polled::Abandoned(a) if a.reason == AbandonReason::Disconnected => {
                Err(self.abandon(host, a))
            }
            Polled::Abandoned(_) => {
                let container = document.read(|tree| logical_container(tree, host));
                Ok(fallback_point(document, host, container))
            }
        }
    }

    fn cancel_reason(&self) -> TerminationReason {
        if self.shared.shutdown.is_cancelled() {
            TerminationReason::Shutdown
        } else {
            TerminationReason::Navigation
        }
    }

    fn cancelled(&self, host: NodeId) -> ProcessOutcome {
        tracing::debug!(%host, "pipeline cancelled");
        ProcessOutcome::Cancelled
    }

    fn confirm(&self, host: NodeId) -> Result<(), Signal> {
        let classification = self.shared.document.read(|tree| {
            tree.element(host)
                .map(|el| self.shared.classifier.classify(&el))
        });
        match classification {
            Some(c) if c.is_assistant() => Ok(()),
            Some(c) => {
                tracing::debug!(%host, signal = ?c.signal, "not an assistant message");
                Err(c.signal)
            }
            None => Err(Signal::NoMatch),
        }
    }

    fn abandon(&self, host: NodeId, abandoned: Abandoned) -> ProcessOutcome {
        tracing::debug!(%host, reason = %abandoned.reason, attempts = abandoned.attempts, "candidate abandoned");
        self.emit(EngineEvent::CandidateAbandoned { host, abandoned });
        ProcessOutcome::Abandoned(abandoned)
    }

    /// Re-run heal for a watched host.
    pub fn heal(&self, host: NodeId) -> DomResult<HealOutcome> {
        self.shared.reconciler.heal(host)
    }

    /// Cancel running pipelines and terminate every session. The registry
    /// is empty when this returns.
    pub fn teardown(&self, reason: TerminationReason) -> usize {
        self.cancel_pipelines();
        let count = self.shared.reconciler.terminate_all(reason);
        self.emit(EngineEvent::SessionsTornDown { count });
        count
    }

    /// Conversation switch: tear down, let the page settle, re-scan.
    pub async fn handle_navigation(&self) -> ScanReport {
        let count = self.teardown(TerminationReason::Navigation);
        tracing::info!(sessions = count, "sessions torn down for navigation");
        tokio::time::sleep(self.shared.config.navigation_settle()).await;
        self.wait_for_page().await;
        self.scan().await
    }

    /// Stop background tasks and terminate every session. Controls already
    /// in the page are left in place.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.cancel_pipelines();
        let count = self.shared.reconciler.terminate_all(TerminationReason::Shutdown);
        tracing::info!(sessions = count, "engine shut down");
    }
}

/// A managed tray at the tail of `container`, or the host itself when no
/// tray can be created there.
fn fallback_point(document: &Document, host: NodeId, container: NodeId) -> (NodeId, TraySource) {
    match synthesize_tray(document, container) {
        Ok(tray) => (tray, TraySource::Synthesized),
        Err(e) => {
            tracing::debug!(%host, error = %e, "tray synthesis failed, using host");
            (host, TraySource::HostFallback)
        }
    }
}

/// Scopes a record asks discovery to look at.
fn scopes(tree: &Tree, record: &MutationRecord) -> Vec<NodeId> {
    match record {
        MutationRecord::ChildList { target, added, .. } => added
            .iter()
            .map(|n| match tree.kind(*n) {
                Some(NodeKind::Element(_)) => *n,
                _ => *target,
            })
            .collect(),
        MutationRecord::Attributes { target, .. } => vec![*target],
        MutationRecord::CharacterData { target } => tree.parent(*target).into_iter().collect(),
    }
}

/// The page shows something a conversation renders into.
fn page_has_chat(tree: &Tree) -> bool {
    tree.children(tree.root())
        .iter()
        .filter_map(|id| tree.element(*id))
        .flat_map(|top| std::iter::once(top).chain(top.descendants()))
        .any(|el| {
            el.tag() == "main"
                || el.attr_is("role", "main")
                || is_assistant_marked(&el)
                || is_content_region(&el)
        })
}
