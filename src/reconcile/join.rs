use serde::Serialize;
use std::collections::{hash_map::Entry, HashMap};
use tracing::warn;

use super::{KeyRecord, ReconciledRecord, ResponseRecord, TaxonomyRecord};
use crate::config::Sentinels;

/// Composite join key: (booklet, question).
pub type JoinKey = (i64, i64);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinStats {
    /// Responses dropped because the answer key has no entry for them.
    pub unkeyed_responses: usize,
    /// Extra key rows ignored in favour of the first occurrence.
    pub duplicate_keys: usize,
    /// Extra taxonomy rows ignored in favour of the first occurrence.
    pub duplicate_taxonomy: usize,
    /// Reconciled records that fell back to the taxonomy sentinels.
    pub unmapped_records: usize,
}

/// Index `items` by join key, keeping the first occurrence of each key.
/// Returns the index and the number of ignored duplicates.
pub fn index_first_wins<T, F>(items: &[T], key: F) -> (HashMap<JoinKey, &T>, usize)
where
    F: Fn(&T) -> JoinKey,
{
    let mut index = HashMap::with_capacity(items.len());
    let mut duplicates = 0;
    for item in items {
        match index.entry(key(item)) {
            Entry::Occupied(_) => duplicates += 1,
            Entry::Vacant(slot) => {
                slot.insert(item);
            }
        }
    }
    (index, duplicates)
}

/// Inner join responses to the answer key, then left join the taxonomy.
///
/// Both lookups are first-wins on duplicate keys, so every response yields at
/// most one record and response order is preserved. `is_correct` is left
/// false for the scorer.
pub fn join_records(
    responses: Vec<ResponseRecord>,
    keys: &[KeyRecord],
    taxonomy: &[TaxonomyRecord],
    sentinels: &Sentinels,
) -> (Vec<ReconciledRecord>, JoinStats) {
    let (key_index, duplicate_keys) = index_first_wins(keys, |k| (k.booklet, k.question));
    let (tax_index, duplicate_taxonomy) =
        index_first_wins(taxonomy, |t| (t.booklet, t.question));

    if duplicate_keys > 0 {
        warn!(duplicates = duplicate_keys, "answer key has repeated (booklet, question) rows; first occurrence kept");
    }
    if duplicate_taxonomy > 0 {
        warn!(duplicates = duplicate_taxonomy, "taxonomy has repeated (booklet, question) rows; first occurrence kept");
    }

    let mut stats = JoinStats {
        duplicate_keys,
        duplicate_taxonomy,
        ..Default::default()
    };
    let mut out = Vec::with_capacity(responses.len());

    for resp in responses {
        let jk = (resp.booklet, resp.question);
        let Some(key) = key_index.get(&jk) else {
            stats.unkeyed_responses += 1;
            continue;
        };
        let (area, subspecialty, diagnosis) = match tax_index.get(&jk) {
            Some(t) => (t.area.clone(), t.subspecialty.clone(), t.diagnosis.clone()),
            None => {
                stats.unmapped_records += 1;
                (
                    sentinels.area.clone(),
                    sentinels.subspecialty.clone(),
                    sentinels.diagnosis.clone(),
                )
            }
        };
        out.push(ReconciledRecord {
            institution: resp.institution,
            booklet: resp.booklet,
            cohort_flag: resp.cohort_flag,
            question: resp.question,
            response: resp.response,
            answer: key.answer.clone(),
            area,
            subspecialty,
            diagnosis,
            is_correct: false,
        });
    }

    (out, stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(booklet: i64, question: i64, response: &str) -> ResponseRecord {
        ResponseRecord {
            institution: "IES A".into(),
            booklet,
            cohort_flag: "S".into(),
            question,
            response: response.into(),
        }
    }

    fn key(booklet: i64, question: i64, answer: &str) -> KeyRecord {
        KeyRecord {
            booklet,
            question,
            answer: answer.into(),
        }
    }

    fn tax(booklet: i64, question: i64, area: &str) -> TaxonomyRecord {
        TaxonomyRecord {
            booklet,
            question,
            area: area.into(),
            subspecialty: "CARDIOLOGIA".into(),
            diagnosis: "-".into(),
        }
    }

    #[test]
    fn duplicate_keys_do_not_multiply_rows() {
        let responses = vec![resp(1, 1, "A"), resp(1, 2, "B")];
        let keys = vec![key(1, 1, "A"), key(1, 1, "C"), key(1, 2, "B")];
        let taxonomy = vec![tax(1, 1, "CLINICA"), tax(1, 1, "CIRURGIA")];
        let (records, stats) = join_records(responses, &keys, &taxonomy, &Sentinels::default());

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].answer, "A");
        assert_eq!(records[0].area, "CLINICA");
        assert_eq!(stats.duplicate_keys, 1);
        assert_eq!(stats.duplicate_taxonomy, 1);
    }

    #[test]
    fn unkeyed_responses_are_dropped_and_unmapped_get_sentinels() {
        let responses = vec![resp(7, 3, "A"), resp(1, 1, "A"), resp(1, 2, "D")];
        let keys = vec![key(1, 1, "A"), key(1, 2, "D")];
        let taxonomy = vec![tax(7, 3, "PEDIATRIA"), tax(1, 1, "CLINICA")];
        let (records, stats) = join_records(responses, &keys, &taxonomy, &Sentinels::default());

        assert_eq!(stats.unkeyed_responses, 1);
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.booklet != 7));
        assert_eq!(stats.unmapped_records, 1);
        assert_eq!(records[1].area, "UNMAPPED");
        assert_eq!(records[1].subspecialty, "GENERAL");
        assert_eq!(records[1].diagnosis, "-");
    }
}
