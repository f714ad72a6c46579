use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path, db_file: &str) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(db_file);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS courses(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_course ON classes(course_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            image TEXT,
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_courses(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_courses_class ON student_courses(class_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_links(
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            PRIMARY KEY(parent_id, student_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS evaluations(
            id TEXT PRIMARY KEY,
            course_id TEXT NOT NULL,
            name TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 0,
            is_session_report INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL,
            FOREIGN KEY(course_id) REFERENCES courses(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_evaluations_course ON evaluations(course_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedules(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            session_no INTEGER NOT NULL,
            date TEXT,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(class_id, session_no)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            evaluation_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            score REAL NOT NULL,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(evaluation_id) REFERENCES evaluations(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, evaluation_id, class_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_class ON student_scores(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_scores_student ON student_scores(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS session_reports(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            schedule_id TEXT NOT NULL,
            attended INTEGER NOT NULL DEFAULT 0,
            score REAL NOT NULL DEFAULT 0,
            updated_at TEXT,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(schedule_id) REFERENCES schedules(id),
            UNIQUE(student_id, schedule_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_session_reports_schedule ON session_reports(schedule_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_categories(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            min_score REAL NOT NULL,
            max_score REAL NOT NULL,
            color TEXT NOT NULL DEFAULT '',
            active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    Ok(())
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
        let sql = format!("PRAGMA table_info({})", table);
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                return Ok(true);
            }
        }
        Ok(false)
    }

    #[test]
    fn schema_init_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "students", "image").expect("pragma"));
        assert!(table_has_column(&conn, "evaluations", "is_session_report").expect("pragma"));
    }
}
