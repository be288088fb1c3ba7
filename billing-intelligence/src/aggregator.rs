//! Unified view over note-linked billing records and manual bills.
//!
//! Each page is fetched from both tables concurrently with the same filter
//! and page request, then merged and re-sorted. Ordering is exact within a
//! source and best-effort across sources: page k of the merge holds page k
//! of each table, so a manual bill on page 2 may be newer than a note on
//! page 1 when the tables grow at different rates.

use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use logger_redacted::{redacted_error, redacted_warn, PiiRedactor};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::{AggregatorConfig, BillingConfig};
use crate::error::{BillingError, BillingResult};
use crate::models::{BillKey, BillSource, BillUpdate, BillingFilter, UnifiedBill};
use crate::pagination::PageRequest;
use crate::reporting::{BillingDataPoint, BillingReport, BillingReports, TimeGranularity};
use crate::source::BillingRecordSource;

/// One merged page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedPage {
    pub bills: Vec<UnifiedBill>,
    pub page: PageRequest,
    /// Either source filled its page
    pub has_more: bool,
}

/// Cached result of a refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnifiedBillingView {
    pub bills: Vec<UnifiedBill>,
    pub data_points: Vec<BillingDataPoint>,
    pub filter: BillingFilter,
    pub pages_loaded: u32,
    pub has_more: bool,
    pub generation: u64,
    pub refreshed_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct CacheState {
    view: Option<Arc<UnifiedBillingView>>,
    /// Views from generations at or below this were started before an
    /// invalidation and must not be published
    floor: u64,
}

/// Newest first, then note before manual, then id
pub fn sort_unified(bills: &mut [UnifiedBill]) {
    bills.sort_by_key(|bill| (Reverse(bill.created_at), bill.source(), bill.id));
}

pub struct UnifiedBillingAggregator {
    source: Arc<dyn BillingRecordSource>,
    config: AggregatorConfig,
    redactor: PiiRedactor,
    cache: RwLock<CacheState>,
    generation: AtomicU64,
}

impl UnifiedBillingAggregator {
    pub fn new(source: Arc<dyn BillingRecordSource>, config: AggregatorConfig) -> Self {
        Self::with_redactor(source, config, PiiRedactor::default())
    }

    /// Aggregator whose log redaction follows `config.logging`
    pub fn from_config(source: Arc<dyn BillingRecordSource>, config: &BillingConfig) -> Self {
        Self::with_redactor(
            source,
            config.aggregator.clone(),
            PiiRedactor::from_logger_config(&config.logging),
        )
    }

    pub fn with_redactor(
        source: Arc<dyn BillingRecordSource>,
        config: AggregatorConfig,
        redactor: PiiRedactor,
    ) -> Self {
        debug!(
            page_size = config.page_size,
            redaction = redactor.is_enabled(),
            "Created unified billing aggregator"
        );
        Self {
            source,
            config,
            redactor,
            cache: RwLock::new(CacheState::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Fetch one page from both sources and merge it.
    ///
    /// Fails if either source fails or the pair does not finish within the
    /// configured timeout; the other fetch is dropped.
    pub async fn fetch_page(
        &self,
        filter: &BillingFilter,
        page: PageRequest,
    ) -> BillingResult<UnifiedPage> {
        let load_notes = async {
            if !filter.includes_source(BillSource::Note) {
                return Ok(Vec::new());
            }
            self.source
                .fetch_note_records(filter, page)
                .await
                .map_err(|e| self.fetch_failed(BillSource::Note, page, e))
        };

        let load_manual = async {
            if !filter.includes_source(BillSource::Manual) {
                return Ok(Vec::new());
            }
            self.source
                .fetch_manual_bills(filter, page)
                .await
                .map_err(|e| self.fetch_failed(BillSource::Manual, page, e))
        };

        let timeout = self.config.fetch_timeout();
        let joined = async { tokio::try_join!(load_notes, load_manual) };
        let (notes, manual) = tokio::time::timeout(timeout, joined)
            .await
            .map_err(|_| {
                let err = BillingError::Timeout(format!(
                    "billing page {} not loaded within {}ms",
                    page.page(),
                    timeout.as_millis()
                ));
                redacted_warn!(self.redactor, page = page.page(); err);
                err
            })??;

        let has_more = page.is_full(notes.len()) || page.is_full(manual.len());
        let mut bills: Vec<UnifiedBill> = notes
            .into_iter()
            .map(UnifiedBill::from)
            .chain(manual.into_iter().map(UnifiedBill::from))
            .collect();
        sort_unified(&mut bills);

        debug!(page = page.page(), bills = bills.len(), has_more, "Loaded unified billing page");
        Ok(UnifiedPage { bills, page, has_more })
    }

    fn fetch_failed(
        &self,
        origin: BillSource,
        page: PageRequest,
        err: BillingError,
    ) -> BillingError {
        redacted_warn!(self.redactor, origin = origin, page = page.page(); err);
        BillingError::SourceFetch {
            origin,
            message: self.redactor.redact(&err.to_string()),
        }
    }

    /// Reload pages `1..=pages` into the cache.
    ///
    /// The returned view is always the one this call loaded. It is only
    /// cached when no newer refresh or write has happened in the meantime.
    pub async fn refresh(
        &self,
        filter: BillingFilter,
        pages: u32,
    ) -> BillingResult<Arc<UnifiedBillingView>> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let mut bills = Vec::new();
        let mut has_more = false;
        let mut pages_loaded = 0;
        let mut page = PageRequest::first(self.config.page_size);
        for _ in 0..pages.max(1) {
            let loaded = self.fetch_page(&filter, page).await?;
            bills.extend(loaded.bills);
            has_more = loaded.has_more;
            pages_loaded += 1;
            if !has_more {
                break;
            }
            page = page.next();
        }

        // rows can shift between pages while a refresh runs
        let mut bills: Vec<UnifiedBill> = bills.into_iter().unique_by(UnifiedBill::key).collect();
        sort_unified(&mut bills);
        let data_points = bills.iter().map(BillingDataPoint::from).collect();

        let view = Arc::new(UnifiedBillingView {
            bills,
            data_points,
            filter,
            pages_loaded,
            has_more,
            generation,
            refreshed_at: Utc::now(),
        });

        if self.publish(Arc::clone(&view)) {
            info!(
                generation,
                bills = view.bills.len(),
                pages_loaded,
                has_more,
                "Refreshed unified billing view"
            );
        } else {
            debug!(generation, "Discarded superseded billing refresh");
        }
        Ok(view)
    }

    fn publish(&self, view: Arc<UnifiedBillingView>) -> bool {
        let mut cache = self.cache.write();
        if view.generation <= cache.floor {
            return false;
        }
        if cache.view.as_ref().is_some_and(|current| current.generation >= view.generation) {
            return false;
        }
        cache.view = Some(view);
        true
    }

    pub fn cached(&self) -> Option<Arc<UnifiedBillingView>> {
        self.cache.read().view.clone()
    }

    /// Drop the cached view and reject refreshes already in flight
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut cache = self.cache.write();
        cache.view = None;
        cache.floor = cache.floor.max(generation);
    }

    /// Metrics over the cached view, if one is loaded
    pub fn analytics(&self, granularity: TimeGranularity) -> Option<BillingReport> {
        self.cached().map(|view| {
            BillingReports::build(&view.data_points, granularity, self.config.top_cpt_limit)
        })
    }

    /// Submit a bill. Returns `false` when it was already submitted.
    pub async fn submit(&self, key: BillKey) -> BillingResult<bool> {
        let changed = self
            .source
            .mark_submitted(key)
            .await
            .map_err(|e| self.write_failed("submit", key, e))?;

        if changed {
            self.invalidate();
            info!(bill = %key, "Submitted bill");
        } else {
            debug!(bill = %key, "Bill already submitted");
        }
        Ok(changed)
    }

    /// Submit each key independently, reporting every outcome
    pub async fn submit_many(&self, keys: &[BillKey]) -> Vec<(BillKey, BillingResult<bool>)> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys.iter().copied().unique() {
            outcomes.push((key, self.submit(key).await));
        }
        outcomes
    }

    /// Edit a bill's fields.
    ///
    /// Manual bills only carry RVU, CPT and facility; edits to the coding
    /// fields of a manual bill are rejected before anything is written.
    pub async fn update(&self, key: BillKey, update: &BillUpdate) -> BillingResult<()> {
        if update.is_empty() {
            return Ok(());
        }

        let result = match key.source {
            BillSource::Note => self.source.update_note_record(key.id, update).await,
            BillSource::Manual => {
                if update.touches_note_only_fields() {
                    return Err(BillingError::UnsupportedEdit(format!(
                        "{key} is a manual bill; ICD-10, E/M and MDM fields only exist on \
                         note bills"
                    )));
                }
                self.source.update_manual_bill(key.id, &update.manual_fields()).await
            }
        };

        result.map_err(|e| self.write_failed("update", key, e))?;
        self.invalidate();
        info!(bill = %key, "Updated bill");
        Ok(())
    }

    pub async fn delete(&self, key: BillKey) -> BillingResult<()> {
        self.source
            .delete_bill(key)
            .await
            .map_err(|e| self.write_failed("delete", key, e))?;
        self.invalidate();
        info!(bill = %key, "Deleted bill");
        Ok(())
    }

    fn write_failed(&self, operation: &str, key: BillKey, err: BillingError) -> BillingError {
        if matches!(err, BillingError::NotFound(_)) {
            redacted_warn!(self.redactor, operation = operation, bill = key; err);
        } else {
            redacted_error!(self.redactor, operation = operation, bill = key; err);
        }
        err
    }
}
