mod common;

use common::*;
use serde_json::json;

fn seeded() -> (Sidecar, Fixture) {
    let mut sc = Sidecar::start();
    let fx = seed_course(&mut sc, 2, true);
    seed_grade_scale(&mut sc);
    enroll(&mut sc, &fx, "stu-ana", "Ana");
    enroll(&mut sc, &fx, "stu-ben", "Ben");
    sc.ok(
        "students.linkParent",
        json!({ "parentId": "par-ana", "studentId": "stu-ana" }),
        Some(admin()),
    );
    (sc, fx)
}

#[test]
fn missing_principal_is_unauthorized() {
    let (mut sc, fx) = seeded();
    let code = sc.err_code("calc.leaderboard", json!({ "classId": fx.class_id }), None);
    assert_eq!(code, "unauthorized");
    let code = sc.err_code("courses.create", json!({ "name": "X" }), None);
    assert_eq!(code, "unauthorized");
}

#[test]
fn health_needs_no_principal() {
    let mut sc = Sidecar::start();
    let res = sc.ok("health", json!({}), None);
    assert!(res.get("version").and_then(|v| v.as_str()).is_some());
}

#[test]
fn only_staff_record_scores_and_only_admins_edit_master_data() {
    let (mut sc, fx) = seeded();
    let score = json!({
        "studentId": "stu-ana",
        "evaluationId": fx.midterm_id,
        "classId": fx.class_id,
        "score": 100
    });
    assert_eq!(
        sc.err_code("scores.upsert", score.clone(), Some(student("stu-ana"))),
        "forbidden"
    );
    assert_eq!(
        sc.err_code("scores.upsert", score.clone(), Some(parent("par-ana"))),
        "forbidden"
    );
    sc.ok("scores.upsert", score, Some(teacher()));

    assert_eq!(
        sc.err_code(
            "evaluations.create",
            json!({ "courseId": fx.course_id, "name": "Quiz", "weight": 5 }),
            Some(teacher())
        ),
        "forbidden"
    );
}

#[test]
fn students_see_only_their_own_score() {
    let (mut sc, fx) = seeded();
    sc.ok(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(student("stu-ana")),
    );
    assert_eq!(
        sc.err_code(
            "calc.studentScore",
            json!({ "classId": fx.class_id, "studentId": "stu-ben" }),
            Some(student("stu-ana"))
        ),
        "forbidden"
    );
    assert_eq!(
        sc.err_code(
            "scores.list",
            json!({ "classId": fx.class_id }),
            Some(student("stu-ana"))
        ),
        "forbidden"
    );
}

#[test]
fn parents_see_linked_children_only() {
    let (mut sc, fx) = seeded();
    sc.ok(
        "calc.studentScore",
        json!({ "classId": fx.class_id, "studentId": "stu-ana" }),
        Some(parent("par-ana")),
    );
    assert_eq!(
        sc.err_code(
            "calc.studentScore",
            json!({ "classId": fx.class_id, "studentId": "stu-ben" }),
            Some(parent("par-ana"))
        ),
        "forbidden"
    );
    sc.ok(
        "calc.leaderboard",
        json!({ "classId": fx.class_id }),
        Some(parent("par-ana")),
    );
    assert_eq!(
        sc.err_code(
            "calc.leaderboard",
            json!({ "classId": fx.class_id }),
            Some(parent("par-nobody"))
        ),
        "forbidden"
    );
}

#[test]
fn leaderboard_requires_enrollment_for_students() {
    let (mut sc, fx) = seeded();
    let board = sc.ok(
        "calc.leaderboard",
        json!({ "classId": fx.class_id }),
        Some(student("stu-ben")),
    );
    assert_eq!(board["entries"].as_array().map(|a| a.len()), Some(2));
    assert_eq!(
        sc.err_code(
            "calc.leaderboard",
            json!({ "classId": fx.class_id }),
            Some(student("stu-outsider"))
        ),
        "forbidden"
    );
}

#[test]
fn unknown_role_is_forbidden_and_keeps_the_request_id() {
    let mut sc = Sidecar::start();
    let resp = sc.send_raw(
        &json!({
            "id": "x",
            "method": "courses.list",
            "params": {},
            "principal": { "id": "u", "role": "superuser" }
        })
        .to_string(),
    );
    assert_eq!(resp["id"], json!("x"));
    assert_eq!(resp["ok"], json!(false));
    assert_eq!(resp["error"]["code"], json!("forbidden"));
    assert_eq!(resp["error"]["details"]["role"], json!("unrecognized"));
}
