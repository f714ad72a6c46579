mod common;

use common::*;
use serde_json::json;

fn average(v: &serde_json::Value) -> f64 {
    v.get("average").and_then(|v| v.as_f64()).expect("average")
}

#[test]
fn half_term_session_reports_give_78() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 10, true);
    seed_grade_scale(&mut sc);
    enroll(&mut sc, &fx, "stu-ana", "Ana");
    record_score(&mut sc, &fx, "stu-ana", &fx.midterm_id, 80.0);
    record_score(&mut sc, &fx, "stu-ana", &fx.final_id, 90.0);
    for schedule_id in fx.schedule_ids.iter().take(5) {
        record_session(&mut sc, "stu-ana", schedule_id, 100.0);
    }

    let model = sc.ok(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(teacher()),
    );
    assert!((average(&model) - 78.0).abs() < 1e-9, "got {}", model);
    let breakdown = model.get("breakdown").expect("breakdown");
    assert!(
        (breakdown["sessionReportComponent"].as_f64().expect("component") - 10.0).abs() < 1e-9
    );
    assert_eq!(model["sessions"]["scheduled"], json!(10));
    assert_eq!(model["sessions"]["reported"], json!(5));
    assert_eq!(model["gradeCategory"]["name"], json!("Proficient"));
    assert_eq!(model["sessionReportEvaluation"]["id"], json!(fx.session_eval_id));
}

#[test]
fn no_session_reports_give_68() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 10, true);
    seed_grade_scale(&mut sc);
    enroll(&mut sc, &fx, "stu-ana", "Ana");
    record_score(&mut sc, &fx, "stu-ana", &fx.midterm_id, 80.0);
    record_score(&mut sc, &fx, "stu-ana", &fx.final_id, 90.0);

    let model = sc.ok(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(teacher()),
    );
    assert!((average(&model) - 68.0).abs() < 1e-9, "got {}", model);
    assert_eq!(model["breakdown"]["sessionReportComponent"], json!(0.0));
    assert_eq!(model["gradeCategory"]["name"], json!("Developing"));
}

#[test]
fn score_corrections_replace_the_previous_value() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 2, true);
    seed_grade_scale(&mut sc);
    enroll(&mut sc, &fx, "stu-ana", "Ana");
    record_score(&mut sc, &fx, "stu-ana", &fx.midterm_id, 10.0);
    record_score(&mut sc, &fx, "stu-ana", &fx.midterm_id, 100.0);

    let scores = sc.ok(
        "scores.list",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(teacher()),
    );
    let rows = scores["scores"].as_array().expect("scores");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["score"], json!(100.0));

    let model = sc.ok(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(teacher()),
    );
    assert!((average(&model) - 40.0).abs() < 1e-9);
}

#[test]
fn leaderboard_is_sorted_with_id_tie_break_and_repeatable() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 4, true);
    seed_grade_scale(&mut sc);
    for (id, name) in [("stu-c", "Cam"), ("stu-a", "Ana"), ("stu-b", "Ben"), ("stu-d", "Dee")] {
        enroll(&mut sc, &fx, id, name);
    }
    // stu-a and stu-c tie at 60; stu-b leads; stu-d has nothing recorded.
    for id in ["stu-a", "stu-c"] {
        record_score(&mut sc, &fx, id, &fx.midterm_id, 75.0);
        record_score(&mut sc, &fx, id, &fx.final_id, 75.0);
    }
    record_score(&mut sc, &fx, "stu-b", &fx.midterm_id, 90.0);
    record_score(&mut sc, &fx, "stu-b", &fx.final_id, 90.0);
    for schedule_id in &fx.schedule_ids {
        record_session(&mut sc, "stu-b", schedule_id, 100.0);
    }

    let board = sc.ok(
        "calc.leaderboard",
        json!({ "classId": fx.class_id }),
        Some(teacher()),
    );
    let entries = board["entries"].as_array().expect("entries").clone();
    let order: Vec<&str> = entries
        .iter()
        .map(|e| e["studentId"].as_str().expect("studentId"))
        .collect();
    assert_eq!(order, vec!["stu-b", "stu-a", "stu-c", "stu-d"]);
    let ranks: Vec<i64> = entries
        .iter()
        .map(|e| e["rank"].as_i64().expect("rank"))
        .collect();
    assert_eq!(ranks, vec![1, 2, 3, 4]);
    assert!((average(&entries[0]) - 92.0).abs() < 1e-9);
    assert!((average(&entries[1]) - 60.0).abs() < 1e-9);
    assert_eq!(average(&entries[3]), 0.0);
    assert_eq!(entries[0]["attendedSessions"], json!(4));
    assert_eq!(board["weights"]["sumsTo100"], json!(true));

    let again = sc.ok(
        "calc.leaderboard",
        json!({ "classId": fx.class_id }),
        Some(teacher()),
    );
    assert_eq!(board, again);
}

#[test]
fn leaderboard_shows_null_grade_when_scale_has_gaps() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 1, true);
    sc.ok(
        "gradeCategories.create",
        json!({ "name": "Top", "minScore": 90, "maxScore": 100 }),
        Some(admin()),
    );
    enroll(&mut sc, &fx, "stu-a", "Ana");
    record_score(&mut sc, &fx, "stu-a", &fx.midterm_id, 50.0);

    let board = sc.ok(
        "calc.leaderboard",
        json!({ "classId": fx.class_id }),
        Some(admin()),
    );
    assert_eq!(board["entries"][0]["gradeCategory"], json!(null));

    let code = sc.err_code(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-a" }),
        Some(admin()),
    );
    assert_eq!(code, "no_matching_grade_bracket");
}

#[test]
fn course_without_session_report_evaluation_is_not_scored() {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 3, false);
    seed_grade_scale(&mut sc);
    enroll(&mut sc, &fx, "stu-a", "Ana");

    for method in ["calc.leaderboard", "calc.studentScore"] {
        let code = sc.err_code(
            method,
            json!({ "classId": fx.class_id, "studentId": "stu-a" }),
            Some(admin()),
        );
        assert_eq!(code, "missing_session_report_evaluation", "{}", method);
    }
}
