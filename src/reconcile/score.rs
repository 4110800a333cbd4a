use super::ReconciledRecord;

/// Canonical form used for answer comparison.
pub fn normalize_answer(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Exact match after normalization, or an annulled item (credit to everyone).
/// A blank key answer matches nothing.
pub fn is_correct(response: &str, answer: &str, annulled_token: &str) -> bool {
    let answer = normalize_answer(answer);
    if answer == normalize_answer(annulled_token) {
        return true;
    }
    !answer.is_empty() && normalize_answer(response) == answer
}

/// Score every record in place. Returns how many records were credited
/// through annulment.
pub fn score_records(records: &mut [ReconciledRecord], annulled_token: &str) -> usize {
    let token = normalize_answer(annulled_token);
    let mut annulled = 0;
    for rec in records.iter_mut() {
        let answer = normalize_answer(&rec.answer);
        rec.is_correct = if answer == token {
            annulled += 1;
            true
        } else {
            !answer.is_empty() && normalize_answer(&rec.response) == answer
        };
    }
    annulled
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalized_exact_match() {
        assert!(is_correct("A", "a ", "ANULADA"));
        assert!(is_correct(" c", "C", "ANULADA"));
        assert!(!is_correct("B", "A", "ANULADA"));
        assert!(!is_correct("AB", "A", "ANULADA"));
        assert!(!is_correct("", "A", "ANULADA"));
        assert!(!is_correct("", "", "ANULADA"));
        assert!(!is_correct(" ", "  ", "ANULADA"));
    }

    #[test]
    fn annulled_question_credits_any_response() {
        for response in ["A", "", "*", "nonsense", "  "] {
            assert!(is_correct(response, "anulada", "ANULADA"));
            assert!(is_correct(response, " ANULADA ", "ANULADA"));
        }
    }

    #[test]
    fn scoring_counts_annulled_records() {
        let rec = |response: &str, answer: &str| ReconciledRecord {
            institution: "IES A".into(),
            booklet: 1,
            cohort_flag: "S".into(),
            question: 1,
            response: response.into(),
            answer: answer.into(),
            area: "CLINICA".into(),
            subspecialty: "CARDIOLOGIA".into(),
            diagnosis: "-".into(),
            is_correct: false,
        };
        let mut records = vec![rec("a", "A"), rec("B", "A"), rec("", "Anulada"), rec("", "")];
        assert_eq!(score_records(&mut records, "ANULADA"), 1);
        let flags: Vec<bool> = records.iter().map(|r| r.is_correct).collect();
        assert_eq!(flags, vec![true, false, true, false]);
    }
}
