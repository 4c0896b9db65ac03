use anyhow::Result;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use quartier_types::api::Report;
use quartier_types::models::{ReportStatus, User};
use quartier_types::rules::Paging;

use crate::Database;
use crate::models::{opt_uuid_at, parsed_at, summary_at, uuid_at};
use crate::queries::{IrisScope, count};

pub struct NewReport<'a> {
    pub reported_user_id: Uuid,
    pub reason: &'a str,
    pub content_id: Option<&'a str>,
    pub content_type: Option<&'a str>,
    pub description: Option<&'a str>,
}

const REPORT_SELECT: &str = "SELECT r.id, r.reason, r.content_id, r.content_type, r.description, r.status,
            r.treated_by, r.iris_code, r.created_at, r.updated_at,
            a.id, a.firstname, a.lastname, a.profile_picture,
            t.id, t.firstname, t.lastname, t.profile_picture
     FROM reports r
     JOIN users a ON a.id = r.reporter_id
     JOIN users t ON t.id = r.reported_user_id";

fn report_at(row: &Row) -> rusqlite::Result<Report> {
    Ok(Report {
        id: uuid_at(row, 0)?,
        reason: row.get(1)?,
        content_id: row.get(2)?,
        content_type: row.get(3)?,
        description: row.get(4)?,
        status: parsed_at(row, 5)?,
        treated_by: opt_uuid_at(row, 6)?,
        iris_code: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
        reporter: summary_at(row, 10)?,
        reported_user: summary_at(row, 14)?,
    })
}

fn query_report(conn: &Connection, id: Uuid) -> Result<Option<Report>> {
    let sql = format!("{} WHERE r.id = ?1", REPORT_SELECT);
    Ok(conn.query_row(&sql, [id.to_string()], report_at).optional()?)
}

impl Database {
    pub fn create_report(&self, reporter: &User, new: &NewReport<'_>) -> Result<Report> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO reports (id, reporter_id, reported_user_id, reason, content_id, content_type,
                                      description, status, iris_code, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
                params![
                    id.to_string(),
                    reporter.id.to_string(),
                    new.reported_user_id.to_string(),
                    new.reason,
                    new.content_id,
                    new.content_type,
                    new.description,
                    ReportStatus::Pending.as_str(),
                    reporter.iris_code,
                    Utc::now(),
                ],
            )?;
            query_report(conn, id)?.ok_or_else(|| anyhow::anyhow!("report {} vanished after insert", id))
        })
    }

    /// Newest first.
    pub fn list_reports(&self, scope: IrisScope<'_>, paging: Paging) -> Result<(Vec<Report>, u64)> {
        self.with_conn(|conn| {
            let sql = format!(
                "{} WHERE ?1 IS NULL OR r.iris_code = ?1 ORDER BY r.created_at DESC LIMIT ?2 OFFSET ?3",
                REPORT_SELECT
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params![scope, paging.limit, paging.offset()], report_at)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let total = count(conn, "SELECT COUNT(*) FROM reports r WHERE ?1 IS NULL OR r.iris_code = ?1", [scope])?;
            Ok((rows, total))
        })
    }

    pub fn get_report(&self, id: Uuid) -> Result<Option<Report>> {
        self.with_conn(|conn| query_report(conn, id))
    }

    pub fn set_report_status(&self, id: Uuid, status: ReportStatus, treated_by: Uuid) -> Result<Option<Report>> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE reports SET status = ?2, treated_by = ?3, updated_at = ?4 WHERE id = ?1",
                params![id.to_string(), status.as_str(), treated_by.to_string(), Utc::now()],
            )?;
            query_report(conn, id)
        })
    }

    pub fn delete_report(&self, id: Uuid) -> Result<bool> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM reports WHERE id = ?1", [id.to_string()])? > 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::testing::user;
    use quartier_types::models::Role;
    use quartier_types::rules::PageQuery;

    #[test]
    fn report_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let jane = user(&db, "jane@example.org", Role::User, "750101");
        let troll = user(&db, "troll@example.org", Role::User, "750101");
        let moderator = user(&db, "mod@example.org", Role::Moderator, "750101");

        let report = db
            .create_report(
                &jane,
                &NewReport {
                    reported_user_id: troll.id,
                    reason: "insultes",
                    content_id: Some("abc"),
                    content_type: Some("comment"),
                    description: None,
                },
            )
            .unwrap();
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.reported_user.id, troll.id);
        assert_eq!(report.treated_by, None);

        let (reports, total) = db.list_reports(Some("130001"), PageQuery::default().resolve(5)).unwrap();
        assert!(reports.is_empty());
        assert_eq!(total, 0);

        let treated = db.set_report_status(report.id, ReportStatus::Validated, moderator.id).unwrap().unwrap();
        assert_eq!(treated.status, ReportStatus::Validated);
        assert_eq!(treated.treated_by, Some(moderator.id));

        assert!(db.delete_report(report.id).unwrap());
    }
}
