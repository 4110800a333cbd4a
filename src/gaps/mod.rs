// src/gaps/mod.rs
//! Focal-institution vs comparison-cohort correctness rates per taxonomy
//! bucket, and the ranked gap table built from them.
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    str::FromStr,
};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::reconcile::{join::index_first_wins, Reconciled, ReconciledRecord, TaxonomyRecord};

/// One level of the pedagogical taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaxonomyLevel {
    Area,
    Subspecialty,
    Diagnosis,
}

impl TaxonomyLevel {
    /// Column label used in exported tables.
    pub fn label(self) -> &'static str {
        match self {
            TaxonomyLevel::Area => "GRANDE_AREA",
            TaxonomyLevel::Subspecialty => "SUBESPECIALIDADE",
            TaxonomyLevel::Diagnosis => "DIAGNOSTICO",
        }
    }

    fn of_record(self, r: &ReconciledRecord) -> &str {
        match self {
            TaxonomyLevel::Area => &r.area,
            TaxonomyLevel::Subspecialty => &r.subspecialty,
            TaxonomyLevel::Diagnosis => &r.diagnosis,
        }
    }

    fn of_taxonomy(self, t: &TaxonomyRecord) -> &str {
        match self {
            TaxonomyLevel::Area => &t.area,
            TaxonomyLevel::Subspecialty => &t.subspecialty,
            TaxonomyLevel::Diagnosis => &t.diagnosis,
        }
    }
}

impl FromStr for TaxonomyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "area" | "grande_area" => Ok(TaxonomyLevel::Area),
            "subspecialty" | "subespecialidade" => Ok(TaxonomyLevel::Subspecialty),
            "diagnosis" | "diagnostico" => Ok(TaxonomyLevel::Diagnosis),
            other => Err(format!("unknown taxonomy level `{}`", other)),
        }
    }
}

impl fmt::Display for TaxonomyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Values of the grouping levels, in `GapQuery::group_by` order.
pub type BucketKey = Vec<String>;

/// Filters and grouping of one gap computation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapQuery {
    /// Focal institution, compared by exact (trimmed) name.
    pub institution: String,
    /// Booklets in scope for both branches; `None` selects every booklet of
    /// the reconciled record set.
    pub booklets: Option<BTreeSet<i64>>,
    /// Restrict the comparison branch to flagged cohort members.
    pub cohort_only: bool,
    pub group_by: Vec<TaxonomyLevel>,
}

impl GapQuery {
    pub fn new(institution: impl Into<String>) -> Self {
        Self {
            institution: institution.into().trim().to_string(),
            booklets: None,
            cohort_only: false,
            group_by: vec![TaxonomyLevel::Area, TaxonomyLevel::Subspecialty],
        }
    }

    pub fn with_booklets<I: IntoIterator<Item = i64>>(mut self, booklets: I) -> Self {
        self.booklets = Some(booklets.into_iter().collect());
        self
    }

    pub fn cohort_only(mut self, enabled: bool) -> Self {
        self.cohort_only = enabled;
        self
    }

    pub fn group_by(mut self, levels: Vec<TaxonomyLevel>) -> Self {
        self.group_by = levels;
        self
    }

    fn booklet_selected(&self, booklet: i64) -> bool {
        self.booklets.as_ref().map_or(true, |b| b.contains(&booklet))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapRecord {
    pub bucket: BucketKey,
    /// Mean correctness of the focal institution; NaN when it has no records.
    pub institution_rate: f64,
    pub comparison_rate: f64,
    /// `(institution_rate - comparison_rate) * 100`.
    pub gap_pp: f64,
    /// Distinct question numbers the taxonomy maps to this bucket within
    /// the selected booklets.
    pub question_count: usize,
    pub institution_records: usize,
    pub comparison_records: usize,
}

/// Whole-dataset rates (no taxonomy grouping).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub institution_rate: f64,
    pub comparison_rate: f64,
    pub gap_pp: f64,
    pub institution_records: usize,
    pub comparison_records: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    pub query: GapQuery,
    pub summary: Summary,
    /// Ranked ascending by `gap_pp`, worst gap first.
    pub gaps: Vec<GapRecord>,
}

impl GapReport {
    /// The headline slice of the ranked table.
    pub fn critical(&self, n: usize) -> &[GapRecord] {
        &self.gaps[..n.min(self.gaps.len())]
    }

    fn area_position(&self) -> Option<usize> {
        self.query
            .group_by
            .iter()
            .position(|l| *l == TaxonomyLevel::Area)
    }

    /// Ranked gaps without the unmapped catch-all bucket.
    pub fn mapped(&self, unmapped_area: &str) -> Vec<&GapRecord> {
        match self.area_position() {
            Some(pos) => self
                .gaps
                .iter()
                .filter(|g| g.bucket[pos] != unmapped_area)
                .collect(),
            None => self.gaps.iter().collect(),
        }
    }

    /// Mapped gaps grouped per area, areas sorted, ranking kept inside each.
    /// Empty when the query does not group by area.
    pub fn by_area(&self, unmapped_area: &str) -> BTreeMap<String, Vec<&GapRecord>> {
        let mut out: BTreeMap<String, Vec<&GapRecord>> = BTreeMap::new();
        if let Some(pos) = self.area_position() {
            for g in self.mapped(unmapped_area) {
                out.entry(g.bucket[pos].clone()).or_default().push(g);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    correct: usize,
    total: usize,
}

impl Tally {
    fn of(records: &[&ReconciledRecord]) -> Self {
        Tally {
            correct: records.iter().filter(|r| r.is_correct).count(),
            total: records.len(),
        }
    }

    /// Mean of `is_correct`; NaN for an empty group.
    fn rate(self) -> f64 {
        if self.total == 0 {
            f64::NAN
        } else {
            self.correct as f64 / self.total as f64
        }
    }
}

fn bucket_of(record: &ReconciledRecord, levels: &[TaxonomyLevel]) -> BucketKey {
    levels
        .iter()
        .map(|l| l.of_record(record).to_string())
        .collect()
}

/// Per-bucket tallies, buckets in order of first appearance.
fn group_tallies(records: &[&ReconciledRecord], levels: &[TaxonomyLevel]) -> Vec<(BucketKey, Tally)> {
    let mut index: HashMap<BucketKey, usize> = HashMap::new();
    let mut groups: Vec<(BucketKey, Vec<&ReconciledRecord>)> = Vec::new();
    for &rec in records {
        let key = bucket_of(rec, levels);
        match index.get(&key) {
            Some(&i) => groups[i].1.push(rec),
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, vec![rec]));
            }
        }
    }

    // buckets are independent; indexed collect keeps their order
    groups
        .into_par_iter()
        .map(|(key, recs)| (key, Tally::of(&recs)))
        .collect()
}

/// Distinct mapped question numbers per bucket within `scope`.
///
/// Counted over the same first-wins (booklet, question) index the join uses,
/// so a duplicate taxonomy row the join ignored adds no weight.
fn question_weights(
    taxonomy: &[TaxonomyRecord],
    levels: &[TaxonomyLevel],
    scope: &BTreeSet<i64>,
) -> HashMap<BucketKey, usize> {
    let (index, _) = index_first_wins(taxonomy, |t| (t.booklet, t.question));
    let mut sets: HashMap<BucketKey, BTreeSet<i64>> = HashMap::new();
    for ((booklet, question), t) in index {
        if !scope.contains(&booklet) {
            continue;
        }
        let key: BucketKey = levels.iter().map(|l| l.of_taxonomy(t).to_string()).collect();
        sets.entry(key).or_default().insert(question);
    }
    sets.into_iter().map(|(k, qs)| (k, qs.len())).collect()
}

/// NaN sorts after every number; equal gaps keep their input order under a
/// stable sort.
fn cmp_gap(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Compute the summary and the ranked gap table for one query.
#[tracing::instrument(level = "info", skip_all, fields(institution = %query.institution, cohort_only = query.cohort_only))]
pub fn compute_gaps(reconciled: &Reconciled, query: &GapQuery, config: &EngineConfig) -> GapReport {
    let scoped: Vec<&ReconciledRecord> = reconciled
        .records
        .iter()
        .filter(|r| query.booklet_selected(r.booklet))
        .collect();
    let focal: Vec<&ReconciledRecord> = scoped
        .iter()
        .copied()
        .filter(|r| r.institution == query.institution)
        .collect();
    let comparison: Vec<&ReconciledRecord> = if query.cohort_only {
        scoped
            .iter()
            .copied()
            .filter(|r| config.is_truthy_cohort(&r.cohort_flag))
            .collect()
    } else {
        scoped
    };
    debug!(focal = focal.len(), comparison = comparison.len(), "filtered branches");

    let focal_total = Tally::of(&focal);
    let comparison_total = Tally::of(&comparison);
    let summary = Summary {
        institution_rate: focal_total.rate(),
        comparison_rate: comparison_total.rate(),
        gap_pp: (focal_total.rate() - comparison_total.rate()) * 100.0,
        institution_records: focal_total.total,
        comparison_records: comparison_total.total,
    };

    let comparison_groups: HashMap<BucketKey, Tally> =
        group_tallies(&comparison, &query.group_by).into_iter().collect();
    // no explicit selection means the booklets present in the record set
    let scope: BTreeSet<i64> = match &query.booklets {
        Some(selected) => selected.clone(),
        None => reconciled.booklets().into_iter().collect(),
    };
    let weights = question_weights(&reconciled.taxonomy, &query.group_by, &scope);

    let mut gaps: Vec<GapRecord> = group_tallies(&focal, &query.group_by)
        .into_iter()
        .filter_map(|(bucket, inst)| {
            let comp = comparison_groups.get(&bucket)?;
            let (ir, cr) = (inst.rate(), comp.rate());
            Some(GapRecord {
                question_count: weights.get(&bucket).copied().unwrap_or(0),
                bucket,
                institution_rate: ir,
                comparison_rate: cr,
                gap_pp: (ir - cr) * 100.0,
                institution_records: inst.total,
                comparison_records: comp.total,
            })
        })
        .collect();
    gaps.sort_by(|a, b| cmp_gap(a.gap_pp, b.gap_pp));

    info!(
        buckets = gaps.len(),
        institution_rate = summary.institution_rate,
        comparison_rate = summary.comparison_rate,
        gap_pp = summary.gap_pp,
        "computed gaps"
    );

    GapReport {
        query: query.clone(),
        summary,
        gaps,
    }
}
