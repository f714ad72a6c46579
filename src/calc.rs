use crate::grades::{self, GradeCategory};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::collections::HashMap;
use thiserror::Error;

/// Weight sums within this distance of 100 count as complete.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CalcError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("course {course_id} has no session report evaluation")]
    MissingSessionReportEvaluation { course_id: String },
    #[error("no active grade category contains score {score}")]
    NoMatchingGradeBracket { score: f64 },
    #[error("database query failed: {0}")]
    Db(#[from] rusqlite::Error),
}

impl CalcError {
    pub fn code(&self) -> &'static str {
        match self {
            CalcError::NotFound(_) => "not_found",
            CalcError::MissingSessionReportEvaluation { .. } => {
                "missing_session_report_evaluation"
            }
            CalcError::NoMatchingGradeBracket { .. } => "no_matching_grade_bracket",
            CalcError::Db(_) => "db_query_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            CalcError::MissingSessionReportEvaluation { course_id } => {
                Some(json!({ "courseId": course_id }))
            }
            CalcError::NoMatchingGradeBracket { score } => Some(json!({ "score": score })),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationDef {
    pub id: String,
    pub name: String,
    pub weight: f64,
    pub is_session_report: bool,
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub student_id: String,
    pub evaluation_id: String,
    pub score: f64,
}

#[derive(Debug, Clone)]
pub struct SessionReportRow {
    pub student_id: String,
    pub attended: bool,
    pub score: f64,
}

/// Evaluation id => percentage weight for one course.
#[derive(Debug, Clone, Default)]
pub struct WeightMap {
    weights: HashMap<String, f64>,
}

impl WeightMap {
    pub fn from_evaluations(evaluations: &[EvaluationDef]) -> Self {
        let weights = evaluations
            .iter()
            .map(|e| (e.id.clone(), e.weight))
            .collect();
        Self { weights }
    }

    /// Unknown evaluations weigh nothing.
    pub fn weight(&self, evaluation_id: &str) -> f64 {
        self.weights.get(evaluation_id).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightCheck {
    pub evaluation_count: usize,
    pub total_weight: f64,
    pub sums_to_100: bool,
    pub session_report_evaluations: usize,
}

pub fn validate_weights(evaluations: &[EvaluationDef]) -> WeightCheck {
    let total_weight = WeightMap::from_evaluations(evaluations).total();
    WeightCheck {
        evaluation_count: evaluations.len(),
        total_weight,
        sums_to_100: (total_weight - 100.0).abs() <= WEIGHT_SUM_TOLERANCE,
        session_report_evaluations: evaluations.iter().filter(|e| e.is_session_report).count(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionTally {
    /// Σ(score / scheduled sessions); a 0-100 value once every session is reported.
    pub contribution: f64,
    pub reported: usize,
    pub attended: usize,
}

/// Folds session reports into one tally per student.
///
/// Every report is divided by the number of scheduled sessions in the class,
/// not by the number of reports the student has, so unreported sessions count
/// as zero. A class without schedules contributes nothing.
pub fn aggregate_session_reports(
    reports: &[SessionReportRow],
    scheduled_sessions: usize,
) -> HashMap<String, SessionTally> {
    let mut out: HashMap<String, SessionTally> = HashMap::new();
    for r in reports {
        let tally = out.entry(r.student_id.clone()).or_default();
        tally.reported += 1;
        if r.attended {
            tally.attended += 1;
        }
        if scheduled_sessions > 0 {
            tally.contribution += r.score / (scheduled_sessions as f64);
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreBreakdown {
    pub evaluation_component: f64,
    pub session_report_average: f64,
    pub session_report_component: f64,
    pub average: f64,
}

/// Weighted average for one student. `scores` must already be limited to
/// that student within the class.
pub fn aggregate_student_score(
    scores: &[ScoreRow],
    weights: &WeightMap,
    session: &SessionTally,
    session_evaluation: &EvaluationDef,
) -> ScoreBreakdown {
    let evaluation_component: f64 = scores
        .iter()
        .map(|s| s.score * weights.weight(&s.evaluation_id) / 100.0)
        .sum();
    let session_report_component = session.contribution * session_evaluation.weight / 100.0;
    ScoreBreakdown {
        evaluation_component,
        session_report_average: session.contribution,
        session_report_component,
        average: evaluation_component + session_report_component,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub rank: usize,
    pub student_id: String,
    pub name: String,
    pub image: Option<String>,
    pub average: f64,
    pub session_report_average: f64,
    pub attended_sessions: usize,
    pub grade_category: Option<GradeCategory>,
}

/// Sorts by average descending, ties by student id ascending, then numbers
/// the rows from 1.
pub fn rank_leaderboard(entries: &mut [LeaderboardEntry]) {
    entries.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.student_id.cmp(&b.student_id))
    });
    for (i, e) in entries.iter_mut().enumerate() {
        e.rank = i + 1;
    }
}

#[derive(Debug, Clone)]
pub struct CalcContext<'a> {
    pub conn: &'a Connection,
    pub class_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationLine {
    pub evaluation_id: String,
    pub name: String,
    pub weight: f64,
    pub score: Option<f64>,
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub scheduled: usize,
    pub reported: usize,
    pub attended: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentScoreModel {
    pub class_id: String,
    pub student_id: String,
    pub name: String,
    pub image: Option<String>,
    pub evaluations: Vec<EvaluationLine>,
    pub session_report_evaluation: EvaluationDef,
    pub sessions: SessionSummary,
    pub breakdown: ScoreBreakdown,
    pub average: f64,
    pub grade_category: GradeCategory,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardModel {
    pub class_id: String,
    pub class_name: String,
    pub scheduled_sessions: usize,
    pub weights: WeightCheck,
    pub entries: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone)]
struct EnrolledStudent {
    id: String,
    name: String,
    image: Option<String>,
}

/// Rows for one class, fetched before any arithmetic runs.
#[derive(Debug, Clone)]
struct ClassFacts {
    class_name: String,
    evaluations: Vec<EvaluationDef>,
    session_evaluation: EvaluationDef,
    scheduled_sessions: usize,
    reports: Vec<SessionReportRow>,
    scores_by_student: HashMap<String, Vec<ScoreRow>>,
}

pub fn load_course_evaluations(
    conn: &Connection,
    course_id: &str,
) -> Result<Vec<EvaluationDef>, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT id, name, weight, is_session_report
         FROM evaluations
         WHERE course_id = ?
         ORDER BY sort_order, id",
    )?;
    let rows = stmt
        .query_map([course_id], |r| {
            Ok(EvaluationDef {
                id: r.get(0)?,
                name: r.get(1)?,
                weight: r.get(2)?,
                is_session_report: r.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_class_facts(ctx: &CalcContext<'_>) -> Result<ClassFacts, CalcError> {
    let conn = ctx.conn;
    let class_id = ctx.class_id;

    let class_row: Option<(String, String)> = conn
        .query_row(
            "SELECT course_id, name FROM classes WHERE id = ?",
            [class_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let Some((course_id, class_name)) = class_row else {
        return Err(CalcError::NotFound("class"));
    };

    let evaluations = load_course_evaluations(conn, &course_id)?;
    let Some(session_evaluation) = evaluations.iter().find(|e| e.is_session_report).cloned()
    else {
        return Err(CalcError::MissingSessionReportEvaluation { course_id });
    };

    let scheduled_sessions: i64 = conn.query_row(
        "SELECT COUNT(*) FROM schedules WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;

    let mut reports_stmt = conn.prepare(
        "SELECT sr.student_id, sr.attended, sr.score
         FROM session_reports sr
         JOIN schedules s ON s.id = sr.schedule_id
         WHERE s.class_id = ?",
    )?;
    let reports = reports_stmt
        .query_map([class_id], |r| {
            Ok(SessionReportRow {
                student_id: r.get(0)?,
                attended: r.get::<_, i64>(1)? != 0,
                score: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut scores_stmt = conn.prepare(
        "SELECT student_id, evaluation_id, score
         FROM student_scores
         WHERE class_id = ?",
    )?;
    let mut scores_by_student: HashMap<String, Vec<ScoreRow>> = HashMap::new();
    let rows = scores_stmt.query_map([class_id], |r| {
        Ok(ScoreRow {
            student_id: r.get(0)?,
            evaluation_id: r.get(1)?,
            score: r.get(2)?,
        })
    })?;
    for row in rows {
        let row = row?;
        scores_by_student
            .entry(row.student_id.clone())
            .or_default()
            .push(row);
    }

    Ok(ClassFacts {
        class_name,
        evaluations,
        session_evaluation,
        scheduled_sessions: scheduled_sessions.max(0) as usize,
        reports,
        scores_by_student,
    })
}

fn load_enrolled_students(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<EnrolledStudent>, CalcError> {
    let mut stmt = conn.prepare(
        "SELECT s.id, s.name, s.image
         FROM student_courses sc
         JOIN students s ON s.id = sc.student_id
         WHERE sc.class_id = ?
         ORDER BY s.id",
    )?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok(EnrolledStudent {
                id: r.get(0)?,
                name: r.get(1)?,
                image: r.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn compute_student_score(
    ctx: &CalcContext<'_>,
    student_id: &str,
) -> Result<StudentScoreModel, CalcError> {
    let facts = load_class_facts(ctx)?;
    let student = load_enrolled_students(ctx.conn, ctx.class_id)?
        .into_iter()
        .find(|s| s.id == student_id)
        .ok_or(CalcError::NotFound("enrollment"))?;

    let weights = WeightMap::from_evaluations(&facts.evaluations);
    let tallies = aggregate_session_reports(&facts.reports, facts.scheduled_sessions);
    let tally = tallies.get(student_id).copied().unwrap_or_default();
    let scores = facts
        .scores_by_student
        .get(student_id)
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let breakdown = aggregate_student_score(scores, &weights, &tally, &facts.session_evaluation);

    let evaluations = facts
        .evaluations
        .iter()
        .filter(|e| !e.is_session_report)
        .map(|e| {
            let score = scores
                .iter()
                .find(|s| s.evaluation_id == e.id)
                .map(|s| s.score);
            EvaluationLine {
                evaluation_id: e.id.clone(),
                name: e.name.clone(),
                weight: e.weight,
                score,
                contribution: score.map(|v| v * e.weight / 100.0).unwrap_or(0.0),
            }
        })
        .collect();

    let categories = grades::load_grade_categories(ctx.conn)?;
    let grade_category = grades::require_grade_category(&categories, breakdown.average)?.clone();

    tracing::debug!(
        class_id = ctx.class_id,
        student_id,
        average = breakdown.average,
        "computed student score"
    );

    Ok(StudentScoreModel {
        class_id: ctx.class_id.to_string(),
        student_id: student.id,
        name: student.name,
        image: student.image,
        evaluations,
        session_report_evaluation: facts.session_evaluation,
        sessions: SessionSummary {
            scheduled: facts.scheduled_sessions,
            reported: tally.reported,
            attended: tally.attended,
        },
        breakdown,
        average: breakdown.average,
        grade_category,
    })
}

pub fn compute_leaderboard(ctx: &CalcContext<'_>) -> Result<LeaderboardModel, CalcError> {
    let facts = load_class_facts(ctx)?;
    let students = load_enrolled_students(ctx.conn, ctx.class_id)?;
    let categories = grades::load_grade_categories(ctx.conn)?;

    let weights = WeightMap::from_evaluations(&facts.evaluations);
    let weight_check = validate_weights(&facts.evaluations);
    if !weight_check.sums_to_100 {
        tracing::warn!(
            class_id = ctx.class_id,
            total_weight = weight_check.total_weight,
            "evaluation weights do not sum to 100; averages are not on a 0-100 scale"
        );
    }
    let tallies = aggregate_session_reports(&facts.reports, facts.scheduled_sessions);

    let mut entries: Vec<LeaderboardEntry> = students
        .into_iter()
        .map(|s| {
            let tally = tallies.get(&s.id).copied().unwrap_or_default();
            let scores = facts
                .scores_by_student
                .get(&s.id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            let breakdown =
                aggregate_student_score(scores, &weights, &tally, &facts.session_evaluation);
            LeaderboardEntry {
                rank: 0,
                student_id: s.id,
                name: s.name,
                image: s.image,
                average: breakdown.average,
                session_report_average: breakdown.session_report_average,
                attended_sessions: tally.attended,
                grade_category: grades::resolve_grade_category(&categories, breakdown.average)
                    .cloned(),
            }
        })
        .collect();
    rank_leaderboard(&mut entries);

    tracing::debug!(
        class_id = ctx.class_id,
        students = entries.len(),
        scheduled_sessions = facts.scheduled_sessions,
        "computed leaderboard"
    );

    Ok(LeaderboardModel {
        class_id: ctx.class_id.to_string(),
        class_name: facts.class_name,
        scheduled_sessions: facts.scheduled_sessions,
        weights: weight_check,
        entries,
    })
}
