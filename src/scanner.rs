//! The scan loop: extract, deduplicate, check stop conditions, scroll, repeat,
//! then hand the collection to the dispatcher.

use crate::analysis::{Analysis, AnalysisError, Dispatcher};
use crate::config::ScanConfig;
use crate::dedup::DedupIndex;
use crate::extractor::{Extractor, RenderedItem};
use crate::post::{BatchSummary, Post};
use crate::scroll::{ScrollDriver, Viewport};
use crate::settings::{Settings, SettingsStore};
use crate::stop::{StopCondition, StopReason, VibeMode};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// A scrollable page whose rendered timeline items can be queried.
pub trait TimelinePage: Viewport {
    /// Currently rendered items matching `selector`, in document order.
    fn query_items(&self, selector: &str) -> Vec<Box<dyn RenderedItem + '_>>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScanPhase {
    #[default]
    Idle,
    Scanning,
    Analyzing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    Started { mode: VibeMode },
    BatchExtracted(BatchSummary),
    AutoStopped(StopReason),
    NothingCollected,
    AnalysisStarted { posts: usize },
    AnalysisFinished(Result<Analysis, AnalysisError>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanOutcome {
    NothingCollected,
    Analyzed(Result<Analysis, AnalysisError>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScanError {
    #[error("a scan is already running")]
    AlreadyScanning,

    #[error("an analysis is in progress")]
    Analyzing,
}

/// Per-scan state, rebuilt by every start.
#[derive(Debug, Clone)]
pub struct ScanSession {
    pub started_at: DateTime<Utc>,
    pub stop: StopCondition,
    pub prompt: String,
    pub batches: u32,
    pub last_batch: BatchSummary,
}

/// Cloneable control surface for a running controller.
#[derive(Debug, Clone)]
pub struct ScanHandle {
    stop_tx: Arc<watch::Sender<bool>>,
    phase: watch::Receiver<ScanPhase>,
}

impl ScanHandle {
    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    pub fn is_scanning(&self) -> bool {
        self.phase() == ScanPhase::Scanning
    }

    pub fn is_analyzing(&self) -> bool {
        self.phase() == ScanPhase::Analyzing
    }

    /// Asks the scan loop to stop. Ignored unless a scan is running.
    pub fn request_stop(&self) -> bool {
        if !self.is_scanning() {
            debug!(phase = ?self.phase(), "Ignoring stop request");
            return false;
        }
        self.stop_tx.send_replace(true);
        true
    }
}

pub struct ScanController<P> {
    page: P,
    extractor: Extractor,
    dedup: DedupIndex,
    driver: ScrollDriver,
    dispatcher: Dispatcher,
    store: Arc<dyn SettingsStore>,
    item_selectors: Vec<String>,
    max_batches: u32,
    auto_stop_grace: Duration,
    collected: Vec<Post>,
    session: Option<ScanSession>,
    phase: watch::Sender<ScanPhase>,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
    events: mpsc::UnboundedSender<ScanEvent>,
}

impl<P: TimelinePage> ScanController<P> {
    pub fn new(
        page: P,
        config: &ScanConfig,
        dispatcher: Dispatcher,
        store: Arc<dyn SettingsStore>,
    ) -> (Self, mpsc::UnboundedReceiver<ScanEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let (phase, _) = watch::channel(ScanPhase::Idle);

        let controller = Self {
            page,
            extractor: Extractor::new(config.permalink_origin.clone()),
            dedup: DedupIndex::new(config.dedup_prefix_chars),
            driver: ScrollDriver::new(config.timing.clone()),
            dispatcher,
            store,
            item_selectors: config.item_selectors.clone(),
            max_batches: config.max_batches,
            auto_stop_grace: Duration::from_millis(config.auto_stop_grace_ms),
            collected: Vec::new(),
            session: None,
            phase,
            stop_tx: Arc::new(stop_tx),
            stop_rx,
            events,
        };
        (controller, events_rx)
    }

    pub fn handle(&self) -> ScanHandle {
        ScanHandle {
            stop_tx: Arc::clone(&self.stop_tx),
            phase: self.phase.subscribe(),
        }
    }

    pub fn phase(&self) -> ScanPhase {
        *self.phase.borrow()
    }

    /// Posts collected so far, in discovery order.
    pub fn collected(&self) -> &[Post] {
        &self.collected
    }

    pub fn dedup(&self) -> &DedupIndex {
        &self.dedup
    }

    pub fn session(&self) -> Option<&ScanSession> {
        self.session.as_ref()
    }

    /// Starts a scan with the stored settings.
    pub fn start(&mut self) -> Result<Option<StopReason>, ScanError> {
        let settings = Settings::load(self.store.as_ref());
        self.start_with(&settings)
    }

    /// Starts a scan and runs the first extraction pass.
    ///
    /// Returns the stop reason if that first batch already satisfies the stop condition.
    pub fn start_with(&mut self, settings: &Settings) -> Result<Option<StopReason>, ScanError> {
        self.ensure_idle()?;

        self.collected.clear();
        self.dedup.clear();
        self.driver.reset(self.page.scroll_top());
        self.dispatcher.apply_settings(settings);
        self.stop_tx.send_replace(false);

        let stop = settings.stop_condition();
        self.session = Some(ScanSession {
            started_at: Utc::now(),
            stop,
            prompt: settings.prompt(),
            batches: 0,
            last_batch: BatchSummary::default(),
        });
        self.set_phase(ScanPhase::Scanning);
        info!(mode = %stop.mode, target = stop.target_count, window_hours = stop.window_hours, "Scan started");
        self.emit(ScanEvent::Started { mode: stop.mode });

        let first_new = self.extract_batch();
        Ok(self.check_stop(first_new))
    }

    /// One scroll step followed by an extraction pass.
    pub async fn step(&mut self) -> Option<StopReason> {
        if self.phase() != ScanPhase::Scanning {
            return None;
        }
        let step = self.driver.step(&mut self.page).await;
        debug!(?step, "Scroll step");
        let first_new = self.extract_batch();
        self.check_stop(first_new)
    }

    /// Ends the scan and analyzes what was collected.
    ///
    /// Returns `None` when no scan is running.
    pub async fn stop(&mut self) -> Option<ScanOutcome> {
        if self.phase() != ScanPhase::Scanning {
            return None;
        }
        self.stop_tx.send_replace(true);

        let elapsed_ms = self
            .session
            .as_ref()
            .map(|s| (Utc::now() - s.started_at).num_milliseconds())
            .unwrap_or(0);
        info!(total = self.collected.len(), elapsed_ms, "Scan stopped");

        if self.collected.is_empty() {
            self.set_phase(ScanPhase::Idle);
            self.emit(ScanEvent::NothingCollected);
            return Some(ScanOutcome::NothingCollected);
        }
        Some(self.analyze_collected().await)
    }

    /// Runs a whole scan with the stored settings.
    pub async fn run(&mut self) -> Result<ScanOutcome, ScanError> {
        let settings = Settings::load(self.store.as_ref());
        self.run_with(&settings).await
    }

    /// Starts, scrolls until an auto stop or a [`ScanHandle::request_stop`], then analyzes.
    pub async fn run_with(&mut self, settings: &Settings) -> Result<ScanOutcome, ScanError> {
        self.collect_with(settings).await?;
        Ok(self.stop().await.unwrap_or(ScanOutcome::NothingCollected))
    }

    /// Starts and scrolls until the scan should end, leaving it in `Scanning`.
    ///
    /// Returns the auto-stop reason, or `None` after a stop request.
    pub async fn collect_with(&mut self, settings: &Settings) -> Result<Option<StopReason>, ScanError> {
        let mut pending_stop = self.start_with(settings)?;
        let mut stop_rx = self.stop_rx.clone();

        loop {
            if let Some(reason) = pending_stop.take() {
                info!(%reason, grace_ms = self.auto_stop_grace.as_millis() as u64, "Auto stop");
                self.emit(ScanEvent::AutoStopped(reason.clone()));
                tokio::time::sleep(self.auto_stop_grace).await;
                return Ok(Some(reason));
            }

            let delay = self.driver.timing().next_delay();
            tokio::select! {
                _ = stop_rx.wait_for(|stop| *stop) => {
                    info!("Stop requested");
                    return Ok(None);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            pending_stop = self.step().await;
        }
    }

    /// Ends the scan without analysis, keeping the collection.
    pub fn abort(&mut self) -> bool {
        if self.phase() != ScanPhase::Scanning {
            return false;
        }
        self.stop_tx.send_replace(true);
        self.set_phase(ScanPhase::Idle);
        info!(total = self.collected.len(), "Scan ended without analysis");
        true
    }

    /// Analyzes the last collection again with the currently selected template.
    pub async fn reanalyze(&mut self) -> Result<ScanOutcome, ScanError> {
        self.ensure_idle()?;
        if self.collected.is_empty() {
            return Ok(ScanOutcome::NothingCollected);
        }

        let settings = Settings::load(self.store.as_ref());
        self.dispatcher.apply_settings(&settings);
        let prompt = settings.prompt();
        match self.session.as_mut() {
            Some(session) => session.prompt = prompt,
            None => {
                self.session = Some(ScanSession {
                    started_at: Utc::now(),
                    stop: settings.stop_condition(),
                    prompt,
                    batches: 0,
                    last_batch: BatchSummary::default(),
                })
            }
        }
        Ok(self.analyze_collected().await)
    }

    fn ensure_idle(&self) -> Result<(), ScanError> {
        match self.phase() {
            ScanPhase::Idle => Ok(()),
            ScanPhase::Scanning => Err(ScanError::AlreadyScanning),
            ScanPhase::Analyzing => Err(ScanError::Analyzing),
        }
    }

    async fn analyze_collected(&mut self) -> ScanOutcome {
        self.set_phase(ScanPhase::Analyzing);
        self.emit(ScanEvent::AnalysisStarted {
            posts: self.collected.len(),
        });

        let prompt = self
            .session
            .as_ref()
            .map(|s| s.prompt.clone())
            .unwrap_or_default();
        let started = tokio::time::Instant::now();
        let result = self.dispatcher.analyze(&self.collected, &prompt).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(analysis) => info!(elapsed_ms, backend = ?analysis.backend, "Analysis finished"),
            Err(e) => warn!(elapsed_ms, kind = %e.kind(), error = %e, "Analysis failed"),
        }

        self.emit(ScanEvent::AnalysisFinished(result.clone()));
        self.set_phase(ScanPhase::Idle);
        ScanOutcome::Analyzed(result)
    }

    /// Extracts every rendered item and returns the index of the first post it added.
    fn extract_batch(&mut self) -> usize {
        let started = Instant::now();
        let first_new = self.collected.len();
        let mut summary = BatchSummary::default();

        let items = self
            .item_selectors
            .iter()
            .find_map(|selector| {
                let items = self.page.query_items(selector);
                (!items.is_empty()).then_some(items)
            })
            .unwrap_or_default();

        for item in &items {
            match self.extractor.extract(item.as_ref()) {
                Some(post) if self.dedup.insert(&post) => {
                    self.collected.push(post);
                    summary.added += 1;
                }
                Some(_) => summary.duplicate += 1,
                None => summary.failed += 1,
            }
        }
        summary.total_collected = self.collected.len();

        if let Some(session) = self.session.as_mut() {
            session.batches += 1;
            session.last_batch = summary;
        }
        info!(
            added = summary.added,
            duplicates = summary.duplicate,
            failed = summary.failed,
            total = summary.total_collected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch extracted"
        );
        self.emit(ScanEvent::BatchExtracted(summary));
        first_new
    }

    fn check_stop(&self, first_new: usize) -> Option<StopReason> {
        let session = self.session.as_ref()?;
        if session.stop.mode == VibeMode::Manual {
            return None;
        }

        let latest = &self.collected[first_new..];
        if let Some(reason) = session.stop.evaluate(self.collected.len(), latest, Utc::now()) {
            return Some(reason);
        }
        if self.max_batches > 0 && session.batches >= self.max_batches {
            return Some(StopReason::BatchLimit {
                batches: session.batches,
            });
        }
        None
    }

    fn set_phase(&self, phase: ScanPhase) {
        self.phase.send_replace(phase);
    }

    fn emit(&self, event: ScanEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}
