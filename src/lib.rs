pub mod clean;
pub mod identity;
pub mod report;
mod util;

pub use anyhow::{Context, Error};
use chrono::NaiveDate;
use itertools::Either;
use qu::ick_use::*;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt, fs, io, iter,
    ops::Deref,
    path::{Path, PathBuf},
    sync::Arc,
};

pub use crate::util::{fmt_money, header, path_exists, percentage};

pub type ArcStr = Arc<str>;
pub type Result<T = (), E = anyhow::Error> = std::result::Result<T, E>;
pub type PatientId = u64;
pub type VisitId = u64;

#[derive(Debug, Clone, Deserialize)]
struct AdmissionRaw {
    #[serde(rename = "Name")]
    name: ArcStr,
    #[serde(rename = "Age")]
    age: u32,
    #[serde(rename = "Gender")]
    gender: Gender,
    #[serde(rename = "Blood Type")]
    blood_type: BloodType,
    #[serde(rename = "Medical Condition")]
    medical_condition: ArcStr,
    #[serde(rename = "Date of Admission")]
    date_of_admission: NaiveDate,
    #[serde(rename = "Doctor")]
    doctor: ArcStr,
    #[serde(rename = "Hospital")]
    hospital: ArcStr,
    #[serde(rename = "Insurance Provider")]
    insurance_provider: ArcStr,
    #[serde(rename = "Billing Amount")]
    billing_amount: f64,
    #[serde(rename = "Room Number")]
    room_number: u32,
    #[serde(rename = "Admission Type")]
    admission_type: AdmissionType,
    #[serde(rename = "Discharge Date")]
    discharge_date: NaiveDate,
    #[serde(rename = "Medication")]
    medication: ArcStr,
    #[serde(rename = "Test Results")]
    test_results: TestResult,
}

/// A row in the admissions dataset: one hospital encounter as recorded.
///
/// `source_row` is the 0-based position of the record in the original input,
/// used only for stable tie-breaks during cleaning.
///
/// `patient_id` and `visit_id` are empty until the identity stages of the
/// cleaning pipeline assign them, and are never overwritten afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Admission {
    pub name: ArcStr,
    pub age: u32,
    pub gender: Gender,
    pub blood_type: BloodType,
    pub medical_condition: ArcStr,
    pub date_of_admission: NaiveDate,
    pub doctor: ArcStr,
    pub hospital: ArcStr,
    pub insurance_provider: ArcStr,
    pub billing_amount: f64,
    pub room_number: u32,
    pub admission_type: AdmissionType,
    pub discharge_date: NaiveDate,
    pub medication: ArcStr,
    pub test_results: TestResult,
    pub source_row: usize,
    pub patient_id: Option<PatientId>,
    pub visit_id: Option<VisitId>,
}

impl Admission {
    fn from_raw(source_row: usize, raw: AdmissionRaw) -> Self {
        Self {
            name: raw.name,
            age: raw.age,
            gender: raw.gender,
            blood_type: raw.blood_type,
            medical_condition: raw.medical_condition,
            date_of_admission: raw.date_of_admission,
            doctor: raw.doctor,
            hospital: raw.hospital,
            insurance_provider: raw.insurance_provider,
            billing_amount: raw.billing_amount,
            room_number: raw.room_number,
            admission_type: raw.admission_type,
            discharge_date: raw.discharge_date,
            medication: raw.medication,
            test_results: raw.test_results,
            source_row,
            patient_id: None,
            visit_id: None,
        }
    }

    /// The billing amount in whole cents.
    ///
    /// Monetary fields hold exactly 2 decimal places after normalization, so
    /// this is exact and usable as a comparison key.
    pub fn billing_cents(&self) -> i64 {
        (self.billing_amount * 100.0).round() as i64
    }

    /// Days between admission and discharge.
    pub fn stay_days(&self) -> i64 {
        (self.discharge_date - self.date_of_admission).num_days()
    }
}

/// The parsed list of admissions, with a pre-built index for the `name` field.
pub struct Admissions {
    pub(crate) els: Vec<Admission>,
    name_idx: BTreeMap<ArcStr, Vec<usize>>,
}

impl Admissions {
    pub fn new(els: Vec<Admission>) -> Self {
        let mut this = Admissions {
            els,
            name_idx: BTreeMap::new(),
        };
        this.rebuild_index();
        this
    }

    /// Load admissions from the original CSV extract.
    ///
    /// Any malformed record (unparseable date, unknown category, non-numeric
    /// age or billing) fails the whole load; the csv error carries the
    /// offending record's position.
    pub fn load_orig(path: impl AsRef<Path>) -> Result<Self> {
        let path = orig_path(path.as_ref());
        let file =
            fs::File::open(&path).with_context(|| format!("opening \"{}\"", path.display()))?;
        Self::from_csv_reader(io::BufReader::new(file))
            .with_context(|| format!("while loading \"{}\"", path.display()))
    }

    /// Parse admissions from any CSV source with a header row.
    pub fn from_csv_reader(rdr: impl io::Read) -> Result<Self> {
        let raw: Vec<AdmissionRaw> = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(rdr)
            .into_deserialize()
            .collect::<Result<Vec<_>, _>>()?;
        let els = raw
            .into_iter()
            .enumerate()
            .map(|(idx, raw)| Admission::from_raw(idx, raw))
            .collect();
        Ok(Self::new(els))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(load(path)?))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result {
        save(&self.els, path)
    }

    /// Iterate over admissions for a patient name, in input order.
    pub fn admissions_for_name(&self, name: &str) -> impl Iterator<Item = &Admission> + Clone + '_ {
        let idxs = match self.name_idx.get(name) {
            Some(idxs) => idxs,
            None => return Either::Left(iter::empty()),
        };
        Either::Right(idxs.iter().map(|idx| {
            self.els
                .get(*idx)
                .expect("inconsistent admission name index")
        }))
    }

    /// All distinct names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &ArcStr> + '_ {
        self.name_idx.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = Admission> + '_ {
        self.els.iter().cloned()
    }

    pub fn iter_ref(&self) -> impl Iterator<Item = &Admission> + '_ {
        self.els.iter()
    }

    /// Get an `Admissions` object containing only records that match the filter.
    pub fn filter(&self, f: impl Fn(&Admission) -> bool) -> Self {
        Admissions::new(self.iter().filter(f).collect())
    }

    pub fn retain(&mut self, f: impl Fn(&Admission) -> bool) {
        self.els.retain(f);
        self.rebuild_index();
    }

    pub fn count_genders(&self) -> BTreeMap<Gender, usize> {
        // B Tree so we get a predictable ordering.
        let mut map = BTreeMap::new();
        // Manually insert to make sure all categories are included.
        map.insert(Gender::Male, 0);
        map.insert(Gender::Female, 0);
        for el in self.els.iter() {
            *map.entry(el.gender).or_insert(0) += 1;
        }
        map
    }

    pub fn count_admission_types(&self) -> BTreeMap<AdmissionType, usize> {
        let mut map = BTreeMap::new();
        map.insert(AdmissionType::Elective, 0);
        map.insert(AdmissionType::Emergency, 0);
        map.insert(AdmissionType::Urgent, 0);
        for el in self.els.iter() {
            *map.entry(el.admission_type).or_insert(0) += 1;
        }
        map
    }

    pub fn earliest_admission_date(&self) -> Option<NaiveDate> {
        self.els.iter().map(|adm| adm.date_of_admission).min()
    }

    pub fn latest_admission_date(&self) -> Option<NaiveDate> {
        self.els.iter().map(|adm| adm.date_of_admission).max()
    }

    pub(crate) fn rebuild_index(&mut self) {
        self.name_idx.clear();
        for (idx, adm) in self.els.iter().enumerate() {
            self.name_idx
                .entry(adm.name.clone())
                .or_insert_with(Vec::new)
                .push(idx);
        }
    }
}

impl Deref for Admissions {
    type Target = [Admission];
    fn deref(&self) -> &Self::Target {
        &self.els
    }
}

impl<'a> IntoIterator for &'a Admissions {
    type IntoIter = <&'a [Admission] as IntoIterator>::IntoIter;
    type Item = &'a Admission;
    fn into_iter(self) -> Self::IntoIter {
        self.els.iter()
    }
}

impl FromIterator<Admission> for Admissions {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = Admission>,
    {
        Self::new(iter.into_iter().collect())
    }
}

// Sub-types

/// Gender is encoded 'Male' or 'Female'. No other values exist in the data.
/// If another value is added in the future, this will throw an error, forcing
/// us to handle the situation.
///
/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum Gender {
    Male,
    Female,
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Gender::Male => f.write_str("Male"),
            Gender::Female => f.write_str("Female"),
        }
    }
}

/// ABO/Rh blood type.
///
/// Variants are declared in the lexicographic order of their string forms, so
/// the derived `Ord` sorts the same way the text does in the source data.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APos,
    #[serde(rename = "A-")]
    ANeg,
    #[serde(rename = "AB+")]
    AbPos,
    #[serde(rename = "AB-")]
    AbNeg,
    #[serde(rename = "B+")]
    BPos,
    #[serde(rename = "B-")]
    BNeg,
    #[serde(rename = "O+")]
    OPos,
    #[serde(rename = "O-")]
    ONeg,
}

impl fmt::Display for BloodType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use BloodType::*;
        f.write_str(match self {
            APos => "A+",
            ANeg => "A-",
            AbPos => "AB+",
            AbNeg => "AB-",
            BPos => "B+",
            BNeg => "B-",
            OPos => "O+",
            ONeg => "O-",
        })
    }
}

/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum AdmissionType {
    Elective,
    Emergency,
    Urgent,
}

impl fmt::Display for AdmissionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Ordering is arbitrary.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize, Hash, Ord, PartialOrd)]
pub enum TestResult {
    Abnormal,
    Inconclusive,
    Normal,
}

impl fmt::Display for TestResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Load data into memory.
fn load<T: serde::de::DeserializeOwned>(path: impl AsRef<Path>) -> Result<Vec<T>> {
    fn inner<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
        let reader = io::BufReader::new(fs::File::open(path)?);
        bincode::deserialize_from(reader).map_err(Into::into)
    }
    let path = output_path(path.as_ref());
    check_extension(&path, "bin")?;

    inner(&path).with_context(|| format!("unable to load data from \"{}\"", path.display()))
}

/// Save data to disk.
fn save<T: Serialize>(contents: &[T], path: impl AsRef<Path>) -> Result {
    fn inner<T: Serialize>(contents: &[T], path: &Path) -> Result {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("could not create parent")?;
        }
        if path_exists(path)? {
            event!(
                Level::WARN,
                "overwriting existing file at \"{}\"",
                path.display()
            );
        }
        let mut out = io::BufWriter::new(fs::File::create(path)?);
        bincode::serialize_into(&mut out, contents)?;
        Ok(())
    }
    let path = output_path(path.as_ref());
    check_extension(&path, "bin")?;

    inner(contents, &path).with_context(|| format!("unable to save data to \"{}\"", path.display()))
}

/// Note: No protection from escaping the root directory.
pub fn orig_path(input: &Path) -> PathBuf {
    Path::new("data/raw").join(input)
}

/// Note: No protection from escaping the root directory.
pub fn output_path(input: &Path) -> PathBuf {
    Path::new("data/output").join(input)
}

pub fn check_extension(path: &Path, ext: &str) -> Result<()> {
    ensure!(
        matches!(path.extension(), Some(p) if p == ext),
        "filename should end with `.{}`",
        ext
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// An admission with the fields the cleaning stages care about; everything
    /// else takes a fixed value.
    pub(crate) fn admission(
        source_row: usize,
        name: &str,
        age: u32,
        blood_type: BloodType,
        date_of_admission: NaiveDate,
    ) -> Admission {
        Admission {
            name: name.into(),
            age,
            gender: Gender::Female,
            blood_type,
            medical_condition: "Asthma".into(),
            date_of_admission,
            doctor: "Sarah Palmer".into(),
            hospital: "General Hospital".into(),
            insurance_provider: "Medicare".into(),
            billing_amount: 1234.56,
            room_number: 101,
            admission_type: AdmissionType::Elective,
            discharge_date: date_of_admission + chrono::Duration::days(3),
            medication: "Aspirin".into(),
            test_results: TestResult::Normal,
            source_row,
            patient_id: None,
            visit_id: None,
        }
    }

    pub(crate) fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn csv_round_trip() {
        let csv = "\
Name,Age,Gender,Blood Type,Medical Condition,Date of Admission,Doctor,Hospital,Insurance Provider,Billing Amount,Room Number,Admission Type,Discharge Date,Medication,Test Results
bobby jacksOn,30,Male,B-,Cancer,2024-01-31,Matthew Smith,Sons and Miller,Blue Cross,18856.281306,328,Urgent,2024-02-02,Paracetamol,Normal
";
        let admissions = Admissions::from_csv_reader(csv.as_bytes()).unwrap();
        assert_eq!(admissions.len(), 1);
        let adm = &admissions[0];
        assert_eq!(&*adm.name, "bobby jacksOn");
        assert_eq!(adm.age, 30);
        assert_eq!(adm.blood_type, BloodType::BNeg);
        assert_eq!(adm.admission_type, AdmissionType::Urgent);
        assert_eq!(adm.date_of_admission, date(2024, 1, 31));
        assert_eq!(adm.source_row, 0);
        assert_eq!(adm.patient_id, None);
    }

    #[test]
    fn malformed_record_fails_the_load() {
        // age is not numeric
        let csv = "\
Name,Age,Gender,Blood Type,Medical Condition,Date of Admission,Doctor,Hospital,Insurance Provider,Billing Amount,Room Number,Admission Type,Discharge Date,Medication,Test Results
bobby jackson,unknown,Male,B-,Cancer,2024-01-31,Matthew Smith,Sons and Miller,Blue Cross,18856.28,328,Urgent,2024-02-02,Paracetamol,Normal
";
        assert!(Admissions::from_csv_reader(csv.as_bytes()).is_err());
    }

    #[test]
    fn empty_input_is_valid() {
        let csv = "\
Name,Age,Gender,Blood Type,Medical Condition,Date of Admission,Doctor,Hospital,Insurance Provider,Billing Amount,Room Number,Admission Type,Discharge Date,Medication,Test Results
";
        let admissions = Admissions::from_csv_reader(csv.as_bytes()).unwrap();
        assert!(admissions.is_empty());
    }
}
