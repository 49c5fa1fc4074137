use std::collections::HashMap;
use std::hash::Hash;

/// Sentinel grade reported whenever the overall result is FAIL.
pub const GRADE_NOT_ASSIGNED: &str = "-";

/// Two-decimal rounding used for percentages throughout:
/// `round(100 * x) / 100`, half away from zero.
pub fn round_2_decimals(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Letter grade for a percentage. Highest matching band wins; total over f64.
///
/// Grades are only reported for an overall PASS; callers substitute
/// [`GRADE_NOT_ASSIGNED`] on FAIL.
pub fn grade_for(percentage: f64) -> &'static str {
    if percentage >= 90.0 {
        "A+"
    } else if percentage >= 80.0 {
        "A"
    } else if percentage >= 70.0 {
        "B+"
    } else if percentage >= 60.0 {
        "B"
    } else if percentage >= 50.0 {
        "C+"
    } else if percentage >= 40.0 {
        "C"
    } else if percentage >= 33.0 {
        "D"
    } else {
        "F"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub total: i64,
    pub percentage: f64,
    pub passed: bool,
    pub grade: &'static str,
}

impl Aggregate {
    pub fn result_label(&self) -> &'static str {
        if self.passed {
            "PASS"
        } else {
            "FAIL"
        }
    }
}

/// Total, percentage, pass/fail and grade for one student's subject marks.
///
/// PASS requires every subject mark >= pass_mark (a strict floor, not an
/// average). Percentage is 0 when there are no subjects.
pub fn aggregate_marks(marks: &[i64], full_mark: i64, pass_mark: i64) -> Aggregate {
    let total: i64 = marks.iter().sum();
    let passed = marks.iter().all(|&m| m >= pass_mark);

    let percentage = if marks.is_empty() || full_mark <= 0 {
        0.0
    } else {
        let denom = (full_mark * marks.len() as i64) as f64;
        round_2_decimals(total as f64 / denom * 100.0)
    };

    let grade = if passed {
        grade_for(percentage)
    } else {
        GRADE_NOT_ASSIGNED
    };

    Aggregate {
        total,
        percentage,
        passed,
        grade,
    }
}

/// Dense rank over totals, descending, first-occurrence tie policy.
///
/// Equal totals share the rank of their first sorted position, and the next
/// distinct total takes its absolute 1-based position. A group of two tied
/// at the top leaves the next total at rank 3, not 2.
pub fn dense_rank<K>(totals: &[(K, i64)]) -> HashMap<K, usize>
where
    K: Clone + Eq + Hash,
{
    let mut sorted: Vec<&(K, i64)> = totals.iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1));

    let mut ranks = HashMap::with_capacity(totals.len());
    let mut current_rank = 0usize;
    let mut last_total: Option<i64> = None;

    for (pos, (key, total)) in sorted.into_iter().enumerate() {
        if last_total != Some(*total) {
            current_rank = pos + 1;
        }
        ranks.insert(key.clone(), current_rank);
        last_total = Some(*total);
    }

    ranks
}

/// 1 -> "1st", 2 -> "2nd", 3 -> "3rd", 11..=13 -> "th" regardless of last digit.
pub fn ordinal(n: usize) -> String {
    let suffix = if (11..=13).contains(&(n % 100)) {
        "th"
    } else {
        match n % 10 {
            1 => "st",
            2 => "nd",
            3 => "rd",
            _ => "th",
        }
    };
    format!("{}{}", n, suffix)
}
