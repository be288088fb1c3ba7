//! Persistence boundary for the two billing tables.
//!
//! Note-linked billing records and manual bills live in separate tables with
//! separate shapes. [`BillingRecordSource`] exposes both; the aggregator is
//! the only caller that joins them.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    BillKey, BillSource, BillStatus, BillUpdate, BillingFilter, ManualBill, ManualBillUpdate,
    NoteBillingRecord,
};
use crate::pagination::PageRequest;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingRecordSource: Send + Sync {
    /// Note-linked records matching `filter`, newest first
    async fn fetch_note_records(
        &self,
        filter: &BillingFilter,
        page: PageRequest,
    ) -> BillingResult<Vec<NoteBillingRecord>>;

    /// Manual bills matching `filter`, newest first
    async fn fetch_manual_bills(
        &self,
        filter: &BillingFilter,
        page: PageRequest,
    ) -> BillingResult<Vec<ManualBill>>;

    async fn insert_note_record(&self, record: NoteBillingRecord) -> BillingResult<()>;

    async fn insert_manual_bill(&self, bill: ManualBill) -> BillingResult<()>;

    /// Move a pending bill to submitted.
    ///
    /// Returns `false` when the bill was already submitted.
    async fn mark_submitted(&self, key: BillKey) -> BillingResult<bool>;

    async fn update_note_record(&self, id: Uuid, update: &BillUpdate) -> BillingResult<()>;

    async fn update_manual_bill(&self, id: Uuid, update: &ManualBillUpdate) -> BillingResult<()>;

    async fn delete_bill(&self, key: BillKey) -> BillingResult<()>;
}

/// `BillingRecordSource` backed by two concurrent maps
#[derive(Debug, Default)]
pub struct InMemoryBillingSource {
    notes: DashMap<Uuid, NoteBillingRecord>,
    manual: DashMap<Uuid, ManualBill>,
    notes_unavailable: AtomicBool,
    manual_unavailable: AtomicBool,
}

impl InMemoryBillingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn note_record(&self, id: Uuid) -> Option<NoteBillingRecord> {
        self.notes.get(&id).map(|entry| entry.value().clone())
    }

    pub fn manual_bill(&self, id: Uuid) -> Option<ManualBill> {
        self.manual.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.notes.len() + self.manual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make reads from one table fail until switched back
    pub fn set_unavailable(&self, source: BillSource, unavailable: bool) {
        match source {
            BillSource::Note => self.notes_unavailable.store(unavailable, Ordering::SeqCst),
            BillSource::Manual => self.manual_unavailable.store(unavailable, Ordering::SeqCst),
        }
    }

    fn check_available(&self, source: BillSource) -> BillingResult<()> {
        let unavailable = match source {
            BillSource::Note => self.notes_unavailable.load(Ordering::SeqCst),
            BillSource::Manual => self.manual_unavailable.load(Ordering::SeqCst),
        };
        if unavailable {
            return Err(BillingError::Storage(format!("{source} billing table is unavailable")));
        }
        Ok(())
    }
}

fn page_of<T, K>(mut rows: Vec<T>, page: PageRequest, sort_key: K) -> Vec<T>
where
    K: Fn(&T) -> (std::cmp::Reverse<chrono::DateTime<chrono::Utc>>, Uuid),
{
    rows.sort_by_key(|row| sort_key(row));
    rows.into_iter()
        .skip(usize::try_from(page.offset()).unwrap_or(usize::MAX))
        .take(page.limit() as usize)
        .collect()
}

#[async_trait]
impl BillingRecordSource for InMemoryBillingSource {
    async fn fetch_note_records(
        &self,
        filter: &BillingFilter,
        page: PageRequest,
    ) -> BillingResult<Vec<NoteBillingRecord>> {
        self.check_available(BillSource::Note)?;
        let rows = self
            .notes
            .iter()
            .filter(|entry| filter.matches_note(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(page_of(rows, page, |r: &NoteBillingRecord| {
            (std::cmp::Reverse(r.created_at), r.id)
        }))
    }

    async fn fetch_manual_bills(
        &self,
        filter: &BillingFilter,
        page: PageRequest,
    ) -> BillingResult<Vec<ManualBill>> {
        self.check_available(BillSource::Manual)?;
        let rows = self
            .manual
            .iter()
            .filter(|entry| filter.matches_manual(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        Ok(page_of(rows, page, |b: &ManualBill| {
            (std::cmp::Reverse(b.created_at), b.id)
        }))
    }

    async fn insert_note_record(&self, record: NoteBillingRecord) -> BillingResult<()> {
        if self.notes.contains_key(&record.id) {
            return Err(BillingError::Validation(format!(
                "note billing record {} already exists",
                record.id
            )));
        }
        self.notes.insert(record.id, record);
        Ok(())
    }

    async fn insert_manual_bill(&self, bill: ManualBill) -> BillingResult<()> {
        if self.manual.contains_key(&bill.id) {
            return Err(BillingError::Validation(format!(
                "manual bill {} already exists",
                bill.id
            )));
        }
        self.manual.insert(bill.id, bill);
        Ok(())
    }

    async fn mark_submitted(&self, key: BillKey) -> BillingResult<bool> {
        let status = match key.source {
            BillSource::Note => self.notes.get_mut(&key.id).map(|mut entry| {
                std::mem::replace(&mut entry.status, BillStatus::Submitted)
            }),
            BillSource::Manual => self.manual.get_mut(&key.id).map(|mut entry| {
                std::mem::replace(&mut entry.status, BillStatus::Submitted)
            }),
        };

        match status {
            Some(previous) => {
                debug!(bill = %key, ?previous, "Marked bill submitted");
                Ok(previous == BillStatus::Pending)
            }
            None => Err(BillingError::NotFound(key.to_string())),
        }
    }

    async fn update_note_record(&self, id: Uuid, update: &BillUpdate) -> BillingResult<()> {
        let mut record = self
            .notes
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(BillKey::note(id).to_string()))?;
        record.apply(update);
        Ok(())
    }

    async fn update_manual_bill(&self, id: Uuid, update: &ManualBillUpdate) -> BillingResult<()> {
        let mut bill = self
            .manual
            .get_mut(&id)
            .ok_or_else(|| BillingError::NotFound(BillKey::manual(id).to_string()))?;
        bill.apply(update);
        Ok(())
    }

    async fn delete_bill(&self, key: BillKey) -> BillingResult<()> {
        let removed = match key.source {
            BillSource::Note => self.notes.remove(&key.id).is_some(),
            BillSource::Manual => self.manual.remove(&key.id).is_some(),
        };
        if removed {
            Ok(())
        } else {
            Err(BillingError::NotFound(key.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PatientRef, Rvu};
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn manual_bill(minutes: i64) -> ManualBill {
        ManualBill {
            id: Uuid::new_v4(),
            status: BillStatus::Pending,
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
                + Duration::minutes(minutes),
            facility: Some("Riverside".into()),
            rvu: Rvu::new(dec!(1.30)).unwrap(),
            patient: PatientRef {
                patient_id: None,
                name: "Dana Whitfield".into(),
                mrn: None,
            },
            cpt_codes: vec!["99213".into()],
            created_by: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn test_fetch_pages_newest_first() {
        let source = InMemoryBillingSource::new();
        for minutes in 0..5 {
            source.insert_manual_bill(manual_bill(minutes)).await.unwrap();
        }

        let filter = BillingFilter::default();
        let first = source.fetch_manual_bills(&filter, PageRequest::new(1, 2)).await.unwrap();
        let second = source.fetch_manual_bills(&filter, PageRequest::new(2, 2)).await.unwrap();
        let third = source.fetch_manual_bills(&filter, PageRequest::new(3, 2)).await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert_eq!(third.len(), 1);
        assert!(first[0].created_at > first[1].created_at);
        assert!(first[1].created_at > second[0].created_at);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_rejected() {
        let source = InMemoryBillingSource::new();
        let bill = manual_bill(0);
        source.insert_manual_bill(bill.clone()).await.unwrap();
        assert!(source.insert_manual_bill(bill).await.is_err());
        assert_eq!(source.len(), 1);
    }

    #[tokio::test]
    async fn test_mark_submitted_is_idempotent() {
        let source = InMemoryBillingSource::new();
        let bill = manual_bill(0);
        let key = BillKey::manual(bill.id);
        source.insert_manual_bill(bill).await.unwrap();

        assert!(source.mark_submitted(key).await.unwrap());
        assert!(!source.mark_submitted(key).await.unwrap());
        assert_eq!(source.manual_bill(key.id).unwrap().status, BillStatus::Submitted);
    }

    #[tokio::test]
    async fn test_writes_respect_source() {
        let source = InMemoryBillingSource::new();
        let bill = manual_bill(0);
        let id = bill.id;
        source.insert_manual_bill(bill).await.unwrap();

        let err = source.delete_bill(BillKey::note(id)).await.unwrap_err();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert!(source.manual_bill(id).is_some());

        source.delete_bill(BillKey::manual(id)).await.unwrap();
        assert!(source.is_empty());
    }

    #[test]
    fn test_update_missing_record_is_not_found() {
        let source = InMemoryBillingSource::new();
        let result = tokio_test::block_on(
            source.update_manual_bill(Uuid::new_v4(), &ManualBillUpdate::default()),
        );
        tokio_test::assert_err!(result);

        let bill = manual_bill(0);
        let id = bill.id;
        tokio_test::assert_ok!(tokio_test::block_on(source.insert_manual_bill(bill)));
        let update = ManualBillUpdate {
            facility: Some("Harbor".into()),
            ..Default::default()
        };
        tokio_test::assert_ok!(tokio_test::block_on(source.update_manual_bill(id, &update)));
        assert_eq!(source.manual_bill(id).unwrap().facility.as_deref(), Some("Harbor"));
    }

    #[tokio::test]
    async fn test_unavailable_table_fails_reads() {
        let source = InMemoryBillingSource::new();
        source.set_unavailable(BillSource::Note, true);
        let err = source
            .fetch_note_records(&BillingFilter::default(), PageRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, BillingError::Storage(_)));
        assert!(source
            .fetch_manual_bills(&BillingFilter::default(), PageRequest::default())
            .await
            .is_ok());
    }
}
