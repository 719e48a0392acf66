//! The cleaning pipeline over the admissions table.
//!
//! Stages run strictly in order: name/billing normalization, exact duplicate
//! elimination, age-variance resolution, then the identity stages in
//! [`crate::identity`]. Each stage consumes the whole table and leaves a new
//! whole table; nothing is persisted until every stage has finished.

use chrono::NaiveDate;
use qu::ick_use::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs, path::Path};

use crate::{
    check_extension, output_path, Admission, AdmissionType, Admissions, ArcStr, BloodType, Gender,
    Result, TestResult,
};

/// Run the full pipeline in place and report what it did.
///
/// Stage order is fixed: normalize, exact dedup, age-variance resolution,
/// patient identity, visit sequencing.
pub fn run(admissions: &mut Admissions) -> CleanSummary {
    let initial_records = admissions.len();
    admissions.normalize();
    let exact_duplicates_removed = admissions.drop_exact_duplicates();
    let age_conflicts_removed = admissions.resolve_age_conflicts();
    let identity = admissions.assign_patient_ids();
    let visits = admissions.assign_visit_ids();
    CleanSummary {
        initial_records,
        exact_duplicates_removed,
        age_conflicts_removed,
        final_records: admissions.len(),
        patients: identity.patients,
        visits,
        window_divergent_triples: identity.window_divergent_triples,
    }
}

impl Admissions {
    /// Canonicalize every record's free-text name and round its billing
    /// amount to 2 decimal places. No record is added or removed.
    pub fn normalize(&mut self) {
        for adm in self.els.iter_mut() {
            adm.name = proper_case_name(&adm.name).into();
            adm.billing_amount = round_money(adm.billing_amount);
        }
        self.rebuild_index();
    }

    /// Remove records that are full-attribute duplicates of another record.
    ///
    /// Records partition into arenas keyed on every field except
    /// `source_row`/`patient_id`/`visit_id`; each arena keeps the member that
    /// sorts first by `(date_of_admission, source_row)`. Returns the number of
    /// records removed. Running this twice is a no-op the second time.
    pub fn drop_exact_duplicates(&mut self) -> usize {
        self.keep_first_per_arena(RecordKey::full, |adm| {
            (adm.date_of_admission, adm.source_row)
        })
    }

    /// Collapse groups of records identical on everything except age.
    ///
    /// Such groups are the same clinical encounter recorded with conflicting
    /// ages; we trust the smaller age. Each arena keeps the member that sorts
    /// first by `(age, source_row)`. Returns the number of records removed.
    pub fn resolve_age_conflicts(&mut self) -> usize {
        self.keep_first_per_arena(RecordKey::encounter, |adm| (adm.age, adm.source_row))
    }

    /// Partition records into hash-keyed arenas of row indices and keep only
    /// the member of each arena that minimizes `order`.
    fn keep_first_per_arena<K: Ord>(
        &mut self,
        key: impl Fn(&Admission) -> RecordKey,
        order: impl Fn(&Admission) -> K + Sync,
    ) -> usize {
        let mut arenas: HashMap<RecordKey, Vec<usize>> = HashMap::new();
        for (idx, adm) in self.els.iter().enumerate() {
            arenas.entry(key(adm)).or_insert_with(Vec::new).push(idx);
        }

        // Arenas are independent, so survivor selection can shard across
        // workers; the ordered sweep below rebuilds the table.
        let els = &self.els;
        let keep_idxs: Vec<usize> = arenas
            .par_iter()
            .map(|(_, idxs)| {
                *idxs
                    .iter()
                    .min_by_key(|&&idx| order(&els[idx]))
                    .expect("arena is never empty")
            })
            .collect();

        let removed = self.els.len() - keep_idxs.len();
        if removed == 0 {
            return 0;
        }
        let mut keep = vec![false; self.els.len()];
        for idx in keep_idxs {
            keep[idx] = true;
        }
        let mut pos = 0;
        self.els.retain(|_| {
            let keep_this = keep[pos];
            pos += 1;
            keep_this
        });
        self.rebuild_index();
        removed
    }
}

/// Rewrite a name the way the cleaning pass expects it.
///
/// The whole string is lower-cased, then the first character of each of the
/// first two whitespace-separated tokens is upper-cased. Tokens after the
/// second stay lower-case and the separator structure is untouched. This is
/// not a general title-caser: the data holds single-space `first last` names
/// and exactly that two-token treatment is what downstream comparisons rely
/// on.
pub fn proper_case_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut token = 0usize;
    let mut in_token = false;
    for ch in name.chars() {
        if ch.is_whitespace() {
            in_token = false;
            out.push(ch);
        } else if !in_token {
            in_token = true;
            token += 1;
            if token <= 2 {
                out.extend(ch.to_uppercase());
            } else {
                out.extend(ch.to_lowercase());
            }
        } else {
            out.extend(ch.to_lowercase());
        }
    }
    out
}

/// Round a monetary amount to 2 decimal places, half away from zero.
pub fn round_money(amount: f64) -> f64 {
    (amount * 100.0).round() / 100.0
}

/// The fields a record is compared on during duplicate elimination.
///
/// `age` is `None` when partitioning for age-variance resolution. Billing is
/// compared at cent precision (it has already been normalized to 2 decimal
/// places when these keys are built).
#[derive(Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    name: ArcStr,
    age: Option<u32>,
    gender: Gender,
    blood_type: BloodType,
    medical_condition: ArcStr,
    date_of_admission: NaiveDate,
    doctor: ArcStr,
    hospital: ArcStr,
    insurance_provider: ArcStr,
    billing_cents: i64,
    room_number: u32,
    admission_type: AdmissionType,
    discharge_date: NaiveDate,
    medication: ArcStr,
    test_results: TestResult,
}

impl RecordKey {
    fn new(adm: &Admission, age: Option<u32>) -> Self {
        Self {
            name: adm.name.clone(),
            age,
            gender: adm.gender,
            blood_type: adm.blood_type,
            medical_condition: adm.medical_condition.clone(),
            date_of_admission: adm.date_of_admission,
            doctor: adm.doctor.clone(),
            hospital: adm.hospital.clone(),
            insurance_provider: adm.insurance_provider.clone(),
            billing_cents: adm.billing_cents(),
            room_number: adm.room_number,
            admission_type: adm.admission_type,
            discharge_date: adm.discharge_date,
            medication: adm.medication.clone(),
            test_results: adm.test_results,
        }
    }

    fn full(adm: &Admission) -> Self {
        Self::new(adm, Some(adm.age))
    }

    fn encounter(adm: &Admission) -> Self {
        Self::new(adm, None)
    }
}

/// Record counts and diagnostics from one run of the cleaning pipeline.
///
/// Saved next to the cleaned snapshot so the data quality report can show
/// what the run did without re-running it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanSummary {
    pub initial_records: usize,
    pub exact_duplicates_removed: usize,
    pub age_conflicts_removed: usize,
    pub final_records: usize,
    pub patients: usize,
    pub visits: usize,
    /// Triples sitting within the age tolerance window of a triple with a
    /// different group anchor; see [`crate::identity`].
    pub window_divergent_triples: usize,
}

impl CleanSummary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = output_path(path.as_ref());
        check_extension(&path, "json")?;
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading summary from \"{}\"", path.display()))?;
        serde_json::from_str(&text).map_err(Error::from)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        let path = output_path(path.as_ref());
        check_extension(&path, "json")?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        let text = serde_json::to_string_pretty(self).context("serializing summary")?;
        fs::write(&path, text)
            .with_context(|| format!("unable to save summary to \"{}\"", path.display()))
    }
}
