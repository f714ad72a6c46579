use crate::calc::CalcError;
use rusqlite::Connection;
use serde::Serialize;
use std::cmp::Ordering;

/// Score scale grade brackets are expected to cover; bracket bounds stay inside it.
const SCALE_MIN: f64 = 0.0;
const SCALE_MAX: f64 = 100.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeCategory {
    pub id: String,
    pub name: String,
    pub min_score: f64,
    pub max_score: f64,
    pub color: String,
    pub active: bool,
}

impl GradeCategory {
    pub fn contains(&self, score: f64) -> bool {
        self.min_score <= score && score <= self.max_score
    }
}

/// Lookup order for overlapping brackets: lowest min, then lowest max, then id.
fn bracket_order(a: &GradeCategory, b: &GradeCategory) -> Ordering {
    a.min_score
        .partial_cmp(&b.min_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| {
            a.max_score
                .partial_cmp(&b.max_score)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.id.cmp(&b.id))
}

fn active_sorted(categories: &[GradeCategory]) -> Vec<&GradeCategory> {
    let mut active: Vec<&GradeCategory> = categories.iter().filter(|c| c.active).collect();
    active.sort_by(|a, b| bracket_order(a, b));
    active
}

pub fn resolve_grade_category(categories: &[GradeCategory], score: f64) -> Option<&GradeCategory> {
    active_sorted(categories)
        .into_iter()
        .find(|c| c.contains(score))
}

pub fn require_grade_category(
    categories: &[GradeCategory],
    score: f64,
) -> Result<&GradeCategory, CalcError> {
    resolve_grade_category(categories, score).ok_or(CalcError::NoMatchingGradeBracket { score })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BracketOverlap {
    pub first_id: String,
    pub second_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageGap {
    pub from: f64,
    pub to: f64,
    pub from_inclusive: bool,
    pub to_inclusive: bool,
}

impl CoverageGap {
    /// Scores strictly between two brackets.
    fn between(after: f64, before: f64) -> Self {
        Self {
            from: after,
            to: before,
            from_inclusive: false,
            to_inclusive: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageReport {
    pub active_count: usize,
    pub overlaps: Vec<BracketOverlap>,
    pub gaps: Vec<CoverageGap>,
    pub covers_full_range: bool,
}

/// Checks the active brackets against [0, 100]. Brackets are inclusive on both
/// ends, so [0, 59] followed by [60, 100] leaves (59, 60) uncovered. Spans
/// below the lowest bracket or above the highest one are gaps too.
pub fn check_coverage(categories: &[GradeCategory]) -> CoverageReport {
    let active = active_sorted(categories);

    let mut overlaps = Vec::new();
    for (i, a) in active.iter().enumerate() {
        for b in active.iter().skip(i + 1) {
            if b.min_score > a.max_score {
                break;
            }
            overlaps.push(BracketOverlap {
                first_id: a.id.clone(),
                second_id: b.id.clone(),
            });
        }
    }

    let mut gaps = Vec::new();
    let mut covered_to: Option<f64> = None;
    for c in &active {
        match covered_to {
            None => {
                if c.min_score > SCALE_MIN {
                    gaps.push(CoverageGap {
                        from: SCALE_MIN,
                        to: c.min_score,
                        from_inclusive: true,
                        to_inclusive: false,
                    });
                }
                covered_to = Some(c.max_score);
            }
            Some(hi) => {
                if c.min_score > hi {
                    gaps.push(CoverageGap::between(hi, c.min_score));
                }
                covered_to = Some(hi.max(c.max_score));
            }
        }
    }
    match covered_to {
        None => gaps.push(CoverageGap {
            from: SCALE_MIN,
            to: SCALE_MAX,
            from_inclusive: true,
            to_inclusive: true,
        }),
        Some(hi) if hi < SCALE_MAX => gaps.push(CoverageGap {
            from: hi,
            to: SCALE_MAX,
            from_inclusive: false,
            to_inclusive: true,
        }),
        Some(_) => {}
    }

    CoverageReport {
        active_count: active.len(),
        covers_full_range: gaps.is_empty(),
        overlaps,
        gaps,
    }
}

pub fn load_grade_categories(conn: &Connection) -> Result<Vec<GradeCategory>, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, min_score, max_score, color, active
         FROM grade_categories
         ORDER BY min_score, max_score, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(GradeCategory {
                id: r.get(0)?,
                name: r.get(1)?,
                min_score: r.get(2)?,
                max_score: r.get(3)?,
                color: r.get(4)?,
                active: r.get::<_, i64>(5)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bracket(id: &str, min: f64, max: f64, active: bool) -> GradeCategory {
        GradeCategory {
            id: id.to_string(),
            name: id.to_uppercase(),
            min_score: min,
            max_score: max,
            color: String::new(),
            active,
        }
    }

    fn school_scale() -> Vec<GradeCategory> {
        vec![
            bracket("a", 90.0, 100.0, true),
            bracket("c", 0.0, 69.9999, true),
            bracket("b", 70.0, 89.9999, true),
        ]
    }

    #[test]
    fn well_formed_scale_resolves_exactly_one_bracket() {
        let scale = school_scale();
        for i in 0..=1000 {
            let score = i as f64 / 10.0;
            let hits = scale.iter().filter(|c| c.contains(score)).count();
            assert_eq!(hits, 1, "score {} hit {} brackets", score, hits);
        }
        assert_eq!(resolve_grade_category(&scale, 0.0).map(|c| c.id.as_str()), Some("c"));
        assert_eq!(resolve_grade_category(&scale, 78.0).map(|c| c.id.as_str()), Some("b"));
        assert_eq!(resolve_grade_category(&scale, 100.0).map(|c| c.id.as_str()), Some("a"));
    }

    #[test]
    fn inactive_brackets_are_ignored() {
        let mut scale = school_scale();
        scale.push(bracket("legacy", 0.0, 100.0, false));
        scale.retain(|c| c.id != "b");
        assert_eq!(resolve_grade_category(&scale, 75.0), None);
        let e = require_grade_category(&scale, 75.0).expect_err("gap");
        assert_eq!(e.code(), "no_matching_grade_bracket");
    }

    #[test]
    fn overlap_prefers_lowest_min_score() {
        let scale = vec![
            bracket("upper", 60.0, 100.0, true),
            bracket("lower", 50.0, 70.0, true),
        ];
        assert_eq!(
            resolve_grade_category(&scale, 65.0).map(|c| c.id.as_str()),
            Some("lower")
        );
    }

    #[test]
    fn coverage_reports_gaps_between_integer_brackets() {
        let scale = vec![
            bracket("low", 0.0, 59.0, true),
            bracket("high", 60.0, 100.0, true),
        ];
        let report = check_coverage(&scale);
        assert!(!report.covers_full_range);
        assert_eq!(report.gaps, vec![CoverageGap::between(59.0, 60.0)]);
        assert!(report.overlaps.is_empty());
    }

    #[test]
    fn coverage_reports_span_below_lowest_bracket() {
        let report = check_coverage(&[bracket("top", 90.0, 100.0, true)]);
        assert!(!report.covers_full_range);
        assert_eq!(
            report.gaps,
            vec![CoverageGap {
                from: 0.0,
                to: 90.0,
                from_inclusive: true,
                to_inclusive: false,
            }]
        );
    }

    #[test]
    fn coverage_reports_span_above_highest_bracket() {
        let report = check_coverage(&[bracket("low", 0.0, 50.0, true)]);
        assert!(!report.covers_full_range);
        assert_eq!(
            report.gaps,
            vec![CoverageGap {
                from: 50.0,
                to: 100.0,
                from_inclusive: false,
                to_inclusive: true,
            }]
        );
    }

    #[test]
    fn coverage_reports_both_ends_and_middle() {
        let scale = vec![
            bracket("c", 10.0, 40.0, true),
            bracket("b", 50.0, 80.0, true),
        ];
        let report = check_coverage(&scale);
        assert_eq!(report.gaps.len(), 3);
        assert_eq!(report.gaps[0].to, 10.0);
        assert_eq!(report.gaps[1], CoverageGap::between(40.0, 50.0));
        assert_eq!(report.gaps[2].from, 80.0);
        assert!(report.gaps[2].to_inclusive);
    }

    #[test]
    fn coverage_reports_overlaps_and_full_range() {
        let scale = vec![
            bracket("low", 0.0, 60.0, true),
            bracket("high", 60.0, 100.0, true),
        ];
        let report = check_coverage(&scale);
        assert!(report.covers_full_range);
        assert_eq!(report.overlaps.len(), 1);
        assert_eq!(report.overlaps[0].first_id, "low");

        let empty = check_coverage(&[]);
        assert!(!empty.covers_full_range);
        assert_eq!(empty.active_count, 0);
        assert_eq!(empty.gaps.len(), 1);
        assert!(empty.gaps[0].from_inclusive && empty.gaps[0].to_inclusive);
    }
}
