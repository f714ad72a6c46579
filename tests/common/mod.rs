#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

pub struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
    pub workspace: TempDir,
}

pub fn admin() -> serde_json::Value {
    json!({ "id": "admin-1", "role": "admin" })
}

pub fn teacher() -> serde_json::Value {
    json!({ "id": "teacher-1", "role": "teacher" })
}

pub fn student(id: &str) -> serde_json::Value {
    json!({ "id": id, "role": "student" })
}

pub fn parent(id: &str) -> serde_json::Value {
    json!({ "id": id, "role": "parent" })
}

impl Sidecar {
    /// Spawns the daemon without selecting a workspace.
    pub fn spawn() -> Self {
        let exe = env!("CARGO_BIN_EXE_classboardd");
        let mut child = Command::new(exe)
            .env_remove("CLASSBOARD_WORKSPACE")
            .env_remove("CLASSBOARD_DB_FILE")
            .env_remove("CLASSBOARD_CONFIG")
            .env("RUST_LOG", "off")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn classboardd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let workspace = tempfile::tempdir().expect("temp workspace");
        Sidecar {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
            workspace,
        }
    }

    /// Spawns the daemon and selects a fresh temp workspace.
    pub fn start() -> Self {
        let mut sidecar = Sidecar::spawn();
        let path = sidecar.workspace.path().to_string_lossy().to_string();
        sidecar.ok("workspace.select", json!({ "path": path }), None);
        sidecar
    }

    pub fn send_raw(&mut self, line: &str) -> serde_json::Value {
        writeln!(self.stdin, "{}", line).expect("write request");
        self.stdin.flush().expect("flush request");
        let mut out = String::new();
        self.reader.read_line(&mut out).expect("read response line");
        assert!(!out.trim().is_empty(), "empty response");
        serde_json::from_str(out.trim()).expect("parse response json")
    }

    pub fn request(
        &mut self,
        method: &str,
        params: serde_json::Value,
        principal: Option<serde_json::Value>,
    ) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let mut payload = json!({
            "id": id,
            "method": method,
            "params": params,
        });
        if let Some(p) = principal {
            payload["principal"] = p;
        }
        let value = self.send_raw(&payload.to_string());
        assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id.as_str()));
        value
    }

    pub fn ok(
        &mut self,
        method: &str,
        params: serde_json::Value,
        principal: Option<serde_json::Value>,
    ) -> serde_json::Value {
        let value = self.request(method, params, principal);
        assert!(
            value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
            "{} failed: {}",
            method,
            value
        );
        value.get("result").cloned().unwrap_or_else(|| json!({}))
    }

    /// Returns the error code of a request that must fail.
    pub fn err_code(
        &mut self,
        method: &str,
        params: serde_json::Value,
        principal: Option<serde_json::Value>,
    ) -> String {
        let value = self.request(method, params, principal);
        assert_eq!(
            value.get("ok").and_then(|v| v.as_bool()),
            Some(false),
            "{} unexpectedly succeeded: {}",
            method,
            value
        );
        value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .expect("error code")
            .to_string()
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

pub fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// Class with Midterm 40 / Final 40 / session-report 20 and `sessions` schedules.
pub struct Fixture {
    pub course_id: String,
    pub class_id: String,
    pub midterm_id: String,
    pub final_id: String,
    pub session_eval_id: String,
    pub schedule_ids: Vec<String>,
}

pub fn seed_course(sc: &mut Sidecar, sessions: usize, with_session_eval: bool) -> Fixture {
    let course = sc.ok("courses.create", json!({ "name": "Physics" }), Some(admin()));
    let course_id = str_field(&course, "courseId");
    let class = sc.ok(
        "classes.create",
        json!({ "courseId": course_id, "name": "Physics A" }),
        Some(admin()),
    );
    let class_id = str_field(&class, "classId");

    let midterm = sc.ok(
        "evaluations.create",
        json!({ "courseId": course_id, "name": "Midterm", "weight": 40 }),
        Some(admin()),
    );
    let fin = sc.ok(
        "evaluations.create",
        json!({ "courseId": course_id, "name": "Final", "weight": 40 }),
        Some(admin()),
    );
    let session_eval_id = if with_session_eval {
        let s = sc.ok(
            "evaluations.create",
            json!({ "courseId": course_id, "name": "Session Report", "weight": 20, "isSessionReport": true }),
            Some(admin()),
        );
        str_field(&s, "evaluationId")
    } else {
        String::new()
    };

    let mut schedule_ids = Vec::new();
    for _ in 0..sessions {
        let s = sc.ok(
            "schedules.create",
            json!({ "classId": class_id }),
            Some(teacher()),
        );
        schedule_ids.push(str_field(&s, "scheduleId"));
    }

    Fixture {
        course_id,
        class_id,
        midterm_id: str_field(&midterm, "evaluationId"),
        final_id: str_field(&fin, "evaluationId"),
        session_eval_id,
        schedule_ids,
    }
}

pub fn enroll(sc: &mut Sidecar, fx: &Fixture, student_id: &str, name: &str) {
    sc.ok(
        "students.create",
        json!({ "studentId": student_id, "name": name }),
        Some(admin()),
    );
    sc.ok(
        "enrollments.add",
        json!({ "studentId": student_id, "classId": fx.class_id }),
        Some(admin()),
    );
}

pub fn record_score(sc: &mut Sidecar, fx: &Fixture, student_id: &str, evaluation_id: &str, score: f64) {
    sc.ok(
        "scores.upsert",
        json!({
            "studentId": student_id,
            "evaluationId": evaluation_id,
            "classId": fx.class_id,
            "score": score
        }),
        Some(teacher()),
    );
}

pub fn record_session(sc: &mut Sidecar, student_id: &str, schedule_id: &str, score: f64) {
    sc.ok(
        "sessionReports.upsert",
        json!({
            "studentId": student_id,
            "scheduleId": schedule_id,
            "attended": true,
            "score": score
        }),
        Some(teacher()),
    );
}

pub fn seed_grade_scale(sc: &mut Sidecar) {
    for (name, min, max) in [
        ("Needs Support", 0.0, 59.9999),
        ("Developing", 60.0, 74.9999),
        ("Proficient", 75.0, 100.0),
    ] {
        sc.ok(
            "gradeCategories.create",
            json!({ "name": name, "minScore": min, "maxScore": max, "color": "#000000" }),
            Some(admin()),
        );
    }
}
