//! Sequential batch runner.
//!
//! One identifier at a time, one shared browser, a randomized pause between
//! items. Any per-item failure becomes an error record and the loop moves on.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asin::{dedup_identifiers, record_id, Asin};
use crate::error::{ConfigError, FailureKind};
use crate::extract::extract;
use crate::navigator::{Navigator, PageDriver};
use crate::normalize::normalize;
use crate::record::PriceRecord;

/// At most this many re-navigations after a readiness timeout.
pub const MAX_TIMEOUT_RETRIES: u32 = 1;

const INTERRUPTED: &str = "batch interrupted before processing";

/// Closed interval `[min, max]` of seconds between two items.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DelayWindow {
    min_secs: f64,
    max_secs: f64,
}

impl DelayWindow {
    pub fn new(min_secs: f64, max_secs: f64) -> Result<Self, ConfigError> {
        let valid = min_secs.is_finite()
            && max_secs.is_finite()
            && min_secs >= 0.0
            && min_secs <= max_secs;
        if !valid {
            return Err(ConfigError::DelayWindow { min: min_secs, max: max_secs });
        }
        Ok(Self { min_secs, max_secs })
    }

    pub fn min_secs(&self) -> f64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> f64 {
        self.max_secs
    }

    pub fn sample(&self, rng: &mut impl Rng) -> Duration {
        Duration::from_secs_f64(rng.gen_range(self.min_secs..=self.max_secs))
    }

    /// Membership with nanosecond slack for float/Duration conversion.
    pub fn contains(&self, delay: Duration) -> bool {
        let secs = delay.as_secs_f64();
        secs >= self.min_secs - 1e-9 && secs <= self.max_secs + 1e-9
    }
}

impl Default for DelayWindow {
    fn default() -> Self {
        Self { min_secs: 3.0, max_secs: 8.0 }
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub delay: DelayWindow,
    pub retry_on_timeout: bool,
    /// Extra pause after an item hit an anti-bot page.
    pub blocked_cooldown: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            delay: DelayWindow::default(),
            retry_on_timeout: true,
            blocked_cooldown: None,
        }
    }
}

/// Suspends the batch between items.
#[async_trait]
pub trait Pacer: Send {
    async fn pause(&mut self, delay: Duration);
}

/// Real-time pacer. A cancelled token cuts the current pause short.
#[derive(Default)]
pub struct TokioPacer {
    cancel: Option<CancellationToken>,
}

impl TokioPacer {
    pub fn cancellable(cancel: CancellationToken) -> Self {
        Self { cancel: Some(cancel) }
    }
}

#[async_trait]
impl Pacer for TokioPacer {
    async fn pause(&mut self, delay: Duration) {
        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => debug!("pause cut short by cancellation"),
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

// ============================================================================
// Per-item state machine
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Pending,
    Navigating { attempt: u32 },
    Extracting,
    Normalizing,
    Recorded,
    Failed(FailureKind),
}

impl ItemState {
    /// Legal edges. `Failed(Timeout) -> Navigating` is additionally gated by
    /// the retry budget in [`ItemRun`].
    pub fn can_advance_to(self, next: ItemState) -> bool {
        use ItemState::*;
        match (self, next) {
            (Pending, Navigating { attempt: 1 }) => true,
            (Pending, Failed(FailureKind::Validation | FailureKind::Interrupted)) => true,
            (Navigating { .. }, Extracting) => true,
            (Navigating { .. }, Failed(kind)) => {
                !matches!(kind, FailureKind::Validation | FailureKind::Interrupted)
            }
            (Failed(FailureKind::Timeout), Navigating { attempt }) => attempt > 1,
            (Extracting, Normalizing) => true,
            (Normalizing, Recorded) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ItemState::Recorded | ItemState::Failed(_))
    }
}

/// Tracks one identifier through the pipeline.
#[derive(Debug)]
pub struct ItemRun {
    asin: String,
    state: ItemState,
    attempts: u32,
    retries_left: u32,
}

impl ItemRun {
    pub fn new(asin: impl Into<String>, retry_budget: u32) -> Self {
        Self {
            asin: asin.into(),
            state: ItemState::Pending,
            attempts: 0,
            retries_left: retry_budget.min(MAX_TIMEOUT_RETRIES),
        }
    }

    pub fn state(&self) -> ItemState {
        self.state
    }

    fn advance(&mut self, next: ItemState) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!(asin = %self.asin, from = ?self.state, to = ?next, "item state");
        self.state = next;
    }

    fn start_navigation(&mut self) {
        self.attempts += 1;
        self.advance(ItemState::Navigating { attempt: self.attempts });
    }

    /// Consumes one retry if the item just timed out and budget remains.
    fn take_retry(&mut self) -> bool {
        if self.state == ItemState::Failed(FailureKind::Timeout) && self.retries_left > 0 {
            self.retries_left -= 1;
            true
        } else {
            false
        }
    }
}

// ============================================================================
// Runner
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub records: Vec<PriceRecord>,
    pub succeeded: usize,
    pub failed: usize,
    pub interrupted: bool,
}

impl BatchReport {
    pub fn failures(&self) -> impl Iterator<Item = &PriceRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }
}

pub struct BatchRunner<P = TokioPacer> {
    config: BatchConfig,
    navigator: Navigator,
    pacer: P,
    rng: StdRng,
}

impl BatchRunner<TokioPacer> {
    pub fn new(config: BatchConfig, navigator: Navigator) -> Self {
        Self {
            config,
            navigator,
            pacer: TokioPacer::default(),
            rng: StdRng::from_entropy(),
        }
    }
}

impl<P: Pacer> BatchRunner<P> {
    pub fn with_pacer<Q: Pacer>(self, pacer: Q) -> BatchRunner<Q> {
        BatchRunner {
            config: self.config,
            navigator: self.navigator,
            pacer,
            rng: self.rng,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn pacer(&self) -> &P {
        &self.pacer
    }

    /// Runs every identifier in input order and returns one record each.
    ///
    /// `cancel` is checked before each item; identifiers not reached get an
    /// "interrupted" record without navigation.
    pub async fn run<D: PageDriver + ?Sized>(
        &mut self,
        driver: &D,
        identifiers: &[String],
        cancel: &CancellationToken,
    ) -> BatchReport {
        let ids = dedup_identifiers(identifiers);
        let total = ids.len();
        info!("📦 Starting batch: {} identifiers ({} after dedup)", identifiers.len(), total);

        let mut report = BatchReport {
            records: Vec::with_capacity(total),
            ..Default::default()
        };

        for (i, raw) in ids.iter().enumerate() {
            if !report.interrupted && cancel.is_cancelled() {
                warn!("🛑 Batch interrupted, {} identifiers left unprocessed", total - i);
                report.interrupted = true;
            }
            if report.interrupted {
                let id = record_id(raw);
                let url = self.navigator.product_url(&id);
                report.records.push(PriceRecord::failure(id, url, now(), INTERRUPTED));
                continue;
            }

            info!("Processing ASIN {}/{}: {}", i + 1, total, raw);
            let (record, state) = self.process_item(driver, raw);
            report.records.push(record);

            if i + 1 < total {
                let delay = self.config.delay.sample(&mut self.rng);
                info!("⏳ Waiting {:.1}s before next ASIN...", delay.as_secs_f64());
                self.pacer.pause(delay).await;

                if state == ItemState::Failed(FailureKind::Blocked) {
                    if let Some(cooldown) = self.config.blocked_cooldown {
                        warn!("🧊 Blocked page, cooling down for {}s", cooldown.as_secs());
                        self.pacer.pause(cooldown).await;
                    }
                }
            }
        }

        report.succeeded = report.records.iter().filter(|r| r.is_success()).count();
        report.failed = report.records.len() - report.succeeded;
        info!("✅ Batch finished. Success: {}, Failed: {}", report.succeeded, report.failed);
        for record in report.failures() {
            warn!("  {}: {}", record.asin, record.error.as_deref().unwrap_or_default());
        }
        report
    }

    /// Validate, navigate (with the bounded timeout retry), extract, normalize.
    fn process_item<D: PageDriver + ?Sized>(
        &self,
        driver: &D,
        raw: &str,
    ) -> (PriceRecord, ItemState) {
        let budget = if self.config.retry_on_timeout { MAX_TIMEOUT_RETRIES } else { 0 };
        let mut item = ItemRun::new(raw, budget);

        let asin = match Asin::parse(raw) {
            Ok(asin) => asin,
            Err(e) => {
                warn!("⚠️ Skipping malformed identifier: {}", e);
                item.advance(ItemState::Failed(FailureKind::Validation));
                let url = self.navigator.product_url(raw);
                return (PriceRecord::failure(raw, url, now(), e.to_string()), item.state());
            }
        };
        let url = self.navigator.product_url(asin.as_str());

        loop {
            item.start_navigation();
            match self.navigator.navigate(driver, &asin) {
                Ok(page) => {
                    item.advance(ItemState::Extracting);
                    let attempt = extract(&page);
                    drop(page);

                    item.advance(ItemState::Normalizing);
                    let record = normalize(attempt);
                    item.advance(ItemState::Recorded);
                    info!(%asin, price = ?record.current_price, "Scraped pricing data");
                    return (record, item.state());
                }
                Err(e) => {
                    item.advance(ItemState::Failed(e.kind()));
                    if item.take_retry() {
                        warn!(%asin, "🔄 {}; retrying once", e);
                        continue;
                    }
                    warn!(%asin, "❌ {}", e);
                    let record = PriceRecord::failure(asin.as_str(), url, now(), e.to_string());
                    return (record, item.state());
                }
            }
        }
    }
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::navigator::testing::{product_html, FakeDriver, FakePage};

    const BASE: &str = "https://www.amazon.com";

    fn url(asin: &str) -> String {
        format!("{}/dp/{}", BASE, asin)
    }

    #[derive(Default)]
    struct RecordingPacer {
        pauses: Vec<Duration>,
        cancel_on_pause: Option<CancellationToken>,
    }

    #[async_trait]
    impl Pacer for RecordingPacer {
        async fn pause(&mut self, delay: Duration) {
            self.pauses.push(delay);
            if let Some(token) = &self.cancel_on_pause {
                token.cancel();
            }
        }
    }

    fn runner(config: BatchConfig, pacer: RecordingPacer) -> BatchRunner<RecordingPacer> {
        BatchRunner::new(config, Navigator::new(BASE, Duration::from_secs(10)))
            .with_pacer(pacer)
            .with_seed(42)
    }

    fn ids(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_invalid_identifier_is_recorded_without_navigation() {
        let driver = FakeDriver::default();
        let mut runner = runner(BatchConfig::default(), RecordingPacer::default());

        let report = runner.run(&driver, &ids(&["B000INVALID!"]), &CancellationToken::new()).await;

        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.asin, "B000INVALID!");
        assert!(record.error.as_deref().unwrap().contains("invalid ASIN"));
        assert!(record.current_price.is_none());
        assert!(driver.visits.borrow().is_empty());
        assert!(runner.pacer().pauses.is_empty());
    }

    #[tokio::test]
    async fn test_one_record_per_identifier_in_order() {
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Product(product_html("One", "$10.00"))])
            .serve(&url("B0000000B2"), vec![FakePage::Captcha])
            .serve(&url("B0000000C3"), vec![FakePage::Missing])
            .serve(&url("B0000000D4"), vec![FakePage::Crash])
            .serve(&url("B0000000E5"), vec![FakePage::Product(product_html("Five", "$50.00"))]);
        let mut runner = runner(BatchConfig::default(), RecordingPacer::default());

        let input = ids(&[
            "B0000000A1",
            "B0000000B2",
            "bad",
            " b0000000c3 ",
            "b0000000a1",
            "B0000000D4",
            "B0000000E5",
        ]);
        let report = runner.run(&driver, &input, &CancellationToken::new()).await;

        let asins: Vec<_> = report.records.iter().map(|r| r.asin.as_str()).collect();
        assert_eq!(
            asins,
            vec!["B0000000A1", "B0000000B2", "bad", "B0000000C3", "B0000000D4", "B0000000E5"]
        );
        assert_eq!(report.records[2].url, "https://www.amazon.com/dp/bad");
        assert_eq!(report.records[3].url, url("B0000000C3"));
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 4);
        assert!(!report.interrupted);

        assert_eq!(report.records[0].current_price_numeric, Some(10.0));
        assert!(report.records[1].error.as_deref().unwrap().contains("blocked"));
        assert!(report.records[3].error.as_deref().unwrap().contains("not found"));
        assert!(report.records[4].error.as_deref().unwrap().contains("Target crashed"));
        assert_eq!(report.records[5].title.as_deref(), Some("Five"));

        // Failure records only carry identifier, url, timestamp and error.
        let blocked = &report.records[1];
        assert_eq!(blocked.url, url("B0000000B2"));
        assert!(!blocked.scraped_at.is_empty());
        assert!(blocked.title.is_none());
        assert!(blocked.availability.is_none());
        assert!(blocked.prime_eligible.is_none());
    }

    #[tokio::test]
    async fn test_delays_between_items_only() {
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Product(product_html("One", "$1.00"))])
            .serve(&url("B0000000B2"), vec![FakePage::Product(product_html("Two", "$2.00"))])
            .serve(&url("B0000000C3"), vec![FakePage::Product(product_html("Three", "$3.00"))]);
        let window = DelayWindow::new(3.0, 8.0).unwrap();
        let config = BatchConfig { delay: window, ..Default::default() };
        let mut runner = runner(config, RecordingPacer::default());

        runner
            .run(
                &driver,
                &ids(&["B0000000A1", "B0000000B2", "B0000000C3"]),
                &CancellationToken::new(),
            )
            .await;

        let pauses = &runner.pacer().pauses;
        assert_eq!(pauses.len(), 2);
        assert!(pauses.iter().all(|d| window.contains(*d)), "{pauses:?}");
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once_then_batch_continues() {
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Stalled])
            .serve(
                &url("B0000000B2"),
                vec![FakePage::Stalled, FakePage::Product(product_html("Two", "$2.00"))],
            )
            .serve(&url("B0000000C3"), vec![FakePage::Product(product_html("Three", "$3.00"))]);
        let mut runner = runner(BatchConfig::default(), RecordingPacer::default());

        let report = runner
            .run(
                &driver,
                &ids(&["B0000000A1", "B0000000B2", "B0000000C3"]),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(report.records.len(), 3);
        assert!(report.records[0].error.as_deref().unwrap().contains("timed out"));
        assert!(report.records[1].is_success());
        assert!(report.records[2].is_success());

        let visits = driver.visits.borrow();
        assert_eq!(visits.iter().filter(|u| **u == url("B0000000A1")).count(), 2);
        assert_eq!(visits.iter().filter(|u| **u == url("B0000000B2")).count(), 2);
        assert_eq!(visits.iter().filter(|u| **u == url("B0000000C3")).count(), 1);
    }

    #[tokio::test]
    async fn test_no_retry_when_disabled() {
        let driver = FakeDriver::default().serve(&url("B0000000A1"), vec![FakePage::Stalled]);
        let config = BatchConfig { retry_on_timeout: false, ..Default::default() };
        let mut runner = runner(config, RecordingPacer::default());

        runner.run(&driver, &ids(&["B0000000A1"]), &CancellationToken::new()).await;
        assert_eq!(driver.visits.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_blocked_cooldown_follows_regular_delay() {
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Captcha])
            .serve(&url("B0000000B2"), vec![FakePage::Product(product_html("Two", "$2.00"))]);
        let config = BatchConfig {
            delay: DelayWindow::new(1.0, 1.0).unwrap(),
            blocked_cooldown: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let mut runner = runner(config, RecordingPacer::default());

        runner.run(&driver, &ids(&["B0000000A1", "B0000000B2"]), &CancellationToken::new()).await;

        assert_eq!(runner.pacer().pauses, vec![Duration::from_secs(1), Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_blocked_final_item_has_no_trailing_pause() {
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Product(product_html("One", "$1.00"))])
            .serve(&url("B0000000B2"), vec![FakePage::Captcha]);
        let config = BatchConfig {
            delay: DelayWindow::new(1.0, 1.0).unwrap(),
            blocked_cooldown: Some(Duration::from_secs(60)),
            ..Default::default()
        };
        let mut runner = runner(config, RecordingPacer::default());

        let report = runner
            .run(&driver, &ids(&["B0000000A1", "B0000000B2"]), &CancellationToken::new())
            .await;

        assert!(report.records[1].error.as_deref().unwrap().contains("blocked"));
        assert_eq!(runner.pacer().pauses, vec![Duration::from_secs(1)]);
    }

    #[tokio::test]
    async fn test_cancellation_between_items() {
        let token = CancellationToken::new();
        let driver = FakeDriver::default()
            .serve(&url("B0000000A1"), vec![FakePage::Product(product_html("One", "$1.00"))])
            .serve(&url("B0000000B2"), vec![FakePage::Product(product_html("Two", "$2.00"))]);
        let pacer = RecordingPacer {
            cancel_on_pause: Some(token.clone()),
            ..Default::default()
        };
        let mut runner = runner(BatchConfig::default(), pacer);

        let report = runner
            .run(&driver, &ids(&["B0000000A1", "B0000000B2", "B0000000C3"]), &token)
            .await;

        assert!(report.interrupted);
        assert_eq!(report.records.len(), 3);
        assert!(report.records[0].is_success());
        assert_eq!(report.records[1].error.as_deref(), Some(INTERRUPTED));
        assert_eq!(report.records[2].error.as_deref(), Some(INTERRUPTED));
        assert_eq!(driver.visits.borrow().len(), 1);
        assert_eq!(runner.pacer().pauses.len(), 1);
    }

    #[test]
    fn test_state_machine_edges() {
        use ItemState::*;
        assert!(Pending.can_advance_to(Navigating { attempt: 1 }));
        assert!(Pending.can_advance_to(Failed(FailureKind::Validation)));
        assert!(Navigating { attempt: 1 }.can_advance_to(Failed(FailureKind::Timeout)));
        assert!(Failed(FailureKind::Timeout).can_advance_to(Navigating { attempt: 2 }));
        assert!(Extracting.can_advance_to(Normalizing));
        assert!(Normalizing.can_advance_to(Recorded));

        assert!(!Failed(FailureKind::Blocked).can_advance_to(Navigating { attempt: 2 }));
        assert!(!Pending.can_advance_to(Extracting));
        assert!(!Recorded.can_advance_to(Navigating { attempt: 1 }));
        assert!(!Navigating { attempt: 1 }.can_advance_to(Failed(FailureKind::Validation)));
        assert!(Recorded.is_terminal() && Failed(FailureKind::NotFound).is_terminal());
    }

    #[test]
    fn test_retry_budget_is_bounded() {
        let mut item = ItemRun::new("B0000000A1", 5);
        item.start_navigation();
        item.advance(ItemState::Failed(FailureKind::Timeout));
        assert!(item.take_retry());
        item.start_navigation();
        item.advance(ItemState::Failed(FailureKind::Timeout));
        assert!(!item.take_retry());
        assert_eq!(item.attempts, 2);
    }

    #[tokio::test]
    async fn test_tokio_pacer_stops_on_cancel() {
        let token = CancellationToken::new();
        token.cancel();
        let mut pacer = TokioPacer::cancellable(token);
        let started = std::time::Instant::now();
        pacer.pause(Duration::from_secs(30)).await;
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_delay_window() {
        assert!(DelayWindow::new(8.0, 3.0).is_err());
        assert!(DelayWindow::new(-1.0, 3.0).is_err());
        assert!(DelayWindow::new(1.0, f64::NAN).is_err());

        let window = DelayWindow::new(0.5, 2.5).unwrap();
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..1000 {
            assert!(window.contains(window.sample(&mut rng)));
        }
        let fixed = DelayWindow::new(2.0, 2.0).unwrap();
        assert_eq!(fixed.sample(&mut rng), Duration::from_secs(2));
    }
}
