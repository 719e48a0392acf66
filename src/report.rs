//! Read-only aggregate queries over the cleaned admissions table.
//!
//! Everything here runs after the cleaning pipeline has finished; nothing
//! mutates the record set. The report binaries render these results as
//! terminal tables.

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use std::collections::BTreeMap;

use crate::{Admission, Admissions, ArcStr};

/// Default gap, in days, under which a follow-up admission counts as a
/// readmission.
pub const READMISSION_WINDOW_DAYS: i64 = 30;

/// Count records per key, in key order.
pub fn count_by<K: Ord>(
    admissions: &Admissions,
    key: impl Fn(&Admission) -> K,
) -> BTreeMap<K, usize> {
    let mut map = BTreeMap::new();
    for adm in admissions.iter_ref() {
        *map.entry(key(adm)).or_insert(0) += 1;
    }
    map
}

/// The `n` largest counts, biggest first; ties broken by key order. `n == 0`
/// means no limit.
pub fn top_n<K: Ord + Clone>(counts: &BTreeMap<K, usize>, n: usize) -> Vec<(K, usize)> {
    let sorted = counts
        .iter()
        .sorted_by(|(ka, ca), (kb, cb)| cb.cmp(ca).then(ka.cmp(kb)))
        .map(|(k, c)| (k.clone(), *c));
    if n == 0 {
        sorted.collect()
    } else {
        sorted.take(n).collect()
    }
}

/// Billing aggregates for one group of records.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BillingStats {
    pub count: usize,
    pub total: f64,
    pub min: f64,
    pub max: f64,
}

impl BillingStats {
    fn push(&mut self, amount: f64) {
        self.count += 1;
        self.total += amount;
        self.min = self.min.min(amount);
        self.max = self.max.max(amount);
    }

    fn from_amount(amount: f64) -> Self {
        Self {
            count: 1,
            total: amount,
            min: amount,
            max: amount,
        }
    }

    pub fn mean(&self) -> f64 {
        self.total / self.count as f64
    }
}

/// Billing count/sum/min/max per key, in key order.
pub fn billing_by<K: Ord>(
    admissions: &Admissions,
    key: impl Fn(&Admission) -> K,
) -> BTreeMap<K, BillingStats> {
    let mut map: BTreeMap<K, BillingStats> = BTreeMap::new();
    for adm in admissions.iter_ref() {
        map.entry(key(adm))
            .and_modify(|stats| stats.push(adm.billing_amount))
            .or_insert_with(|| BillingStats::from_amount(adm.billing_amount));
    }
    map
}

/// A follow-up admission within the readmission window.
#[derive(Debug, Clone, PartialEq)]
pub struct Readmission {
    pub name: ArcStr,
    pub first_admission: NaiveDate,
    pub next_admission: NaiveDate,
    pub gap_days: i64,
}

/// Find readmissions: for each name, admissions sort chronologically and
/// every consecutive pair at most `max_gap_days` apart flags the later one.
///
/// A same-day repeat admission (gap 0) counts. Results come back in name
/// order, then admission order.
pub fn readmissions(admissions: &Admissions, max_gap_days: i64) -> Vec<Readmission> {
    let mut found = Vec::new();
    for name in admissions.names() {
        let ordered = admissions
            .admissions_for_name(name)
            .sorted_by_key(|adm| (adm.date_of_admission, adm.source_row));
        for (prev, next) in ordered.tuple_windows() {
            let gap_days = (next.date_of_admission - prev.date_of_admission).num_days();
            if gap_days <= max_gap_days {
                found.push(Readmission {
                    name: name.clone(),
                    first_admission: prev.date_of_admission,
                    next_admission: next.date_of_admission,
                    gap_days,
                });
            }
        }
    }
    found
}

/// Admission counts bucketed by calendar (year, month).
pub fn admissions_by_month(admissions: &Admissions) -> BTreeMap<(i32, u32), usize> {
    count_by(admissions, |adm| {
        (adm.date_of_admission.year(), adm.date_of_admission.month())
    })
}

/// Admission counts bucketed by calendar year.
pub fn admissions_by_year(admissions: &Admissions) -> BTreeMap<i32, usize> {
    count_by(admissions, |adm| adm.date_of_admission.year())
}

/// Mean length of stay in days per key, in key order.
pub fn mean_stay_days_by<K: Ord>(
    admissions: &Admissions,
    key: impl Fn(&Admission) -> K,
) -> BTreeMap<K, f64> {
    let mut sums: BTreeMap<K, (i64, usize)> = BTreeMap::new();
    for adm in admissions.iter_ref() {
        let entry = sums.entry(key(adm)).or_insert((0, 0));
        entry.0 += adm.stay_days();
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(k, (total, count))| (k, total as f64 / count as f64))
        .collect()
}
