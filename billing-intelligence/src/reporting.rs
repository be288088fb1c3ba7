use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{BillSource, BillStatus, UnifiedBill};

/// Facility label for bills that carry none
pub const UNASSIGNED_FACILITY: &str = "Unassigned";

/// Flattened bill used by every report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDataPoint {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub rvu: Decimal,
    pub status: BillStatus,
    #[serde(rename = "type")]
    pub bill_type: BillSource,
    pub cpt_codes: Vec<String>,
    pub facility: Option<String>,
}

impl From<&UnifiedBill> for BillingDataPoint {
    fn from(bill: &UnifiedBill) -> Self {
        Self {
            id: bill.id,
            date: bill.created_at,
            rvu: bill.rvu.value(),
            status: bill.status,
            bill_type: bill.source(),
            cpt_codes: bill.cpt_codes.clone(),
            facility: bill.facility.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Day,
    /// ISO weeks, starting Monday
    Week,
    Month,
}

impl TimeGranularity {
    pub fn bucket_start(self, date: NaiveDate) -> NaiveDate {
        match self {
            TimeGranularity::Day => date,
            TimeGranularity::Week => date
                .checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
                .unwrap_or(date),
            TimeGranularity::Month => date.with_day(1).unwrap_or(date),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingSummary {
    pub total_bills: usize,
    pub submitted: usize,
    pub pending: usize,
    pub total_rvu: Decimal,
    /// Percentage of bills submitted, 0-100
    pub submission_rate: Decimal,
    pub avg_rvu_per_bill: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeBucket {
    pub period_start: NaiveDate,
    pub bills: usize,
    pub submitted: usize,
    pub total_rvu: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CptUsage {
    pub code: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacilityRollup {
    pub facility: String,
    pub bills: usize,
    pub submitted: usize,
    pub total_rvu: Decimal,
}

/// Analytics over one aggregated view
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingReport {
    pub summary: BillingSummary,
    pub granularity: TimeGranularity,
    pub time_series: Vec<TimeBucket>,
    pub top_cpt_codes: Vec<CptUsage>,
    pub facilities: Vec<FacilityRollup>,
}

/// Billing reports
pub struct BillingReports;

impl BillingReports {
    pub fn build(
        points: &[BillingDataPoint],
        granularity: TimeGranularity,
        top_cpt_limit: usize,
    ) -> BillingReport {
        BillingReport {
            summary: Self::summary(points),
            granularity,
            time_series: Self::time_series(points, granularity),
            top_cpt_codes: Self::top_cpt_codes(points, top_cpt_limit),
            facilities: Self::facility_rollups(points),
        }
    }

    pub fn summary(points: &[BillingDataPoint]) -> BillingSummary {
        let total_bills = points.len();
        if total_bills == 0 {
            return BillingSummary::default();
        }

        let submitted = points
            .iter()
            .filter(|point| point.status == BillStatus::Submitted)
            .count();
        let total_rvu: Decimal = points.iter().map(|point| point.rvu).sum();
        let count = Decimal::from(total_bills);

        BillingSummary {
            total_bills,
            submitted,
            pending: total_bills - submitted,
            total_rvu,
            submission_rate: (Decimal::from(submitted) * Decimal::ONE_HUNDRED / count).round_dp(2),
            avg_rvu_per_bill: (total_rvu / count).round_dp(2),
        }
    }

    /// One bucket per period that has bills, oldest first
    pub fn time_series(
        points: &[BillingDataPoint],
        granularity: TimeGranularity,
    ) -> Vec<TimeBucket> {
        let mut buckets: BTreeMap<NaiveDate, TimeBucket> = BTreeMap::new();
        for point in points {
            let start = granularity.bucket_start(point.date.date_naive());
            let bucket = buckets.entry(start).or_insert_with(|| TimeBucket {
                period_start: start,
                bills: 0,
                submitted: 0,
                total_rvu: Decimal::ZERO,
            });
            bucket.bills += 1;
            bucket.total_rvu += point.rvu;
            if point.status == BillStatus::Submitted {
                bucket.submitted += 1;
            }
        }
        buckets.into_values().collect()
    }

    /// Most billed CPT codes; ties break on code
    pub fn top_cpt_codes(points: &[BillingDataPoint], limit: usize) -> Vec<CptUsage> {
        points
            .iter()
            .flat_map(|point| point.cpt_codes.iter())
            .counts()
            .into_iter()
            .map(|(code, count)| CptUsage {
                code: code.clone(),
                count,
            })
            .sorted_by(|a, b| b.count.cmp(&a.count).then_with(|| a.code.cmp(&b.code)))
            .take(limit)
            .collect()
    }

    /// Per-facility totals, highest RVU first.
    ///
    /// Facility names group case-insensitively, like the facility filter; a
    /// rollup is labelled with the first spelling seen.
    pub fn facility_rollups(points: &[BillingDataPoint]) -> Vec<FacilityRollup> {
        let mut rollups: BTreeMap<String, FacilityRollup> = BTreeMap::new();
        for point in points {
            let facility = point.facility.as_deref().unwrap_or(UNASSIGNED_FACILITY);
            let key = facility.to_ascii_lowercase();
            let rollup = rollups.entry(key).or_insert_with(|| FacilityRollup {
                facility: facility.to_string(),
                bills: 0,
                submitted: 0,
                total_rvu: Decimal::ZERO,
            });
            rollup.bills += 1;
            rollup.total_rvu += point.rvu;
            if point.status == BillStatus::Submitted {
                rollup.submitted += 1;
            }
        }

        rollups
            .into_values()
            .sorted_by_key(|rollup| Reverse(rollup.total_rvu))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn point(
        day: u32,
        rvu: Decimal,
        status: BillStatus,
        facility: Option<&str>,
        cpt: &[&str],
    ) -> BillingDataPoint {
        BillingDataPoint {
            id: Uuid::new_v4(),
            date: Utc.with_ymd_and_hms(2024, 7, day, 14, 30, 0).unwrap(),
            rvu,
            status,
            bill_type: BillSource::Note,
            cpt_codes: cpt.iter().map(|c| c.to_string()).collect(),
            facility: facility.map(str::to_string),
        }
    }

    fn sample() -> Vec<BillingDataPoint> {
        vec![
            // 2024-07-01 is a Monday
            point(1, dec!(1.30), BillStatus::Submitted, Some("Riverside"), &["99213"]),
            point(3, dec!(1.92), BillStatus::Pending, Some("Riverside"), &["99214", "93000"]),
            point(8, dec!(2.80), BillStatus::Submitted, Some("Lakeview"), &["99215", "99213"]),
            point(9, dec!(0.70), BillStatus::Pending, None, &["99212"]),
        ]
    }

    #[test]
    fn test_summary() {
        let summary = BillingReports::summary(&sample());
        assert_eq!(summary.total_bills, 4);
        assert_eq!(summary.submitted, 2);
        assert_eq!(summary.pending, 2);
        assert_eq!(summary.total_rvu, dec!(6.72));
        assert_eq!(summary.submission_rate, dec!(50));
        assert_eq!(summary.avg_rvu_per_bill, dec!(1.68));
    }

    #[test]
    fn test_empty_summary_is_zero() {
        let summary = BillingReports::summary(&[]);
        assert_eq!(summary, BillingSummary::default());
        assert_eq!(summary.submission_rate, Decimal::ZERO);
    }

    #[test]
    fn test_weekly_series_starts_monday() {
        let series = BillingReports::time_series(&sample(), TimeGranularity::Week);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].period_start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(series[0].bills, 2);
        assert_eq!(series[0].total_rvu, dec!(3.22));
        assert_eq!(series[1].period_start, NaiveDate::from_ymd_opt(2024, 7, 8).unwrap());
        assert_eq!(series[1].submitted, 1);
    }

    #[test]
    fn test_daily_and_monthly_series() {
        assert_eq!(BillingReports::time_series(&sample(), TimeGranularity::Day).len(), 4);

        let monthly = BillingReports::time_series(&sample(), TimeGranularity::Month);
        assert_eq!(monthly.len(), 1);
        assert_eq!(monthly[0].period_start, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(monthly[0].bills, 4);
    }

    #[test]
    fn test_top_cpt_codes() {
        let top = BillingReports::top_cpt_codes(&sample(), 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], CptUsage { code: "99213".into(), count: 2 });
        assert_eq!(top[1].code, "93000");
    }

    #[test]
    fn test_facility_rollups() {
        let rollups = BillingReports::facility_rollups(&sample());
        let names: Vec<&str> = rollups.iter().map(|r| r.facility.as_str()).collect();
        assert_eq!(names, vec!["Riverside", "Lakeview", UNASSIGNED_FACILITY]);
        assert_eq!(rollups[0].total_rvu, dec!(3.22));
        assert_eq!(rollups[0].submitted, 1);
    }

    #[test]
    fn test_facility_rollups_ignore_case() {
        let points = vec![
            point(1, dec!(1.30), BillStatus::Submitted, Some("Riverside"), &["99213"]),
            point(2, dec!(1.92), BillStatus::Pending, Some("riverside"), &["99214"]),
            point(3, dec!(0.70), BillStatus::Pending, Some("RIVERSIDE"), &["99212"]),
        ];
        let rollups = BillingReports::facility_rollups(&points);
        assert_eq!(rollups.len(), 1);
        assert_eq!(rollups[0].facility, "Riverside");
        assert_eq!(rollups[0].bills, 3);
        assert_eq!(rollups[0].total_rvu, dec!(3.92));
    }

    #[test]
    fn test_report_bundles_everything() {
        let report = BillingReports::build(&sample(), TimeGranularity::Month, 10);
        assert_eq!(report.summary.total_bills, 4);
        assert_eq!(report.top_cpt_codes.len(), 5);
        assert_eq!(report.facilities.len(), 3);
    }
}
