use rusqlite::{Connection, OptionalExtension};
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
    Parent,
    /// Any role name this daemon does not know; never in an allowed set.
    #[serde(other)]
    Unrecognized,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
            Role::Parent => "parent",
            Role::Unrecognized => "unrecognized",
        }
    }

    pub fn is_staff(self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

/// The authenticated caller, supplied with every request by the host app.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Principal {
    pub id: String,
    pub role: Role,
}

pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
pub const STAFF: &[Role] = &[Role::Admin, Role::Teacher];
pub const ANY_ROLE: &[Role] = &[Role::Admin, Role::Teacher, Role::Student, Role::Parent];

/// Staff see every student; students see themselves; parents see linked children.
pub fn can_view_student(
    conn: &Connection,
    principal: &Principal,
    student_id: &str,
) -> rusqlite::Result<bool> {
    match principal.role {
        Role::Admin | Role::Teacher => Ok(true),
        Role::Student => Ok(principal.id == student_id),
        Role::Parent => Ok(conn
            .query_row(
                "SELECT 1 FROM parent_links WHERE parent_id = ? AND student_id = ?",
                (&principal.id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some()),
        Role::Unrecognized => Ok(false),
    }
}

/// Students must be enrolled in the class; parents need an enrolled child.
pub fn can_view_class(
    conn: &Connection,
    principal: &Principal,
    class_id: &str,
) -> rusqlite::Result<bool> {
    let hit: Option<i64> = match principal.role {
        Role::Admin | Role::Teacher => return Ok(true),
        Role::Student => conn
            .query_row(
                "SELECT 1 FROM student_courses WHERE student_id = ? AND class_id = ?",
                (&principal.id, class_id),
                |r| r.get(0),
            )
            .optional()?,
        Role::Parent => conn
            .query_row(
                "SELECT 1
                 FROM parent_links pl
                 JOIN student_courses sc ON sc.student_id = pl.student_id
                 WHERE pl.parent_id = ? AND sc.class_id = ?
                 LIMIT 1",
                (&principal.id, class_id),
                |r| r.get(0),
            )
            .optional()?,
        Role::Unrecognized => None,
    };
    Ok(hit.is_some())
}
