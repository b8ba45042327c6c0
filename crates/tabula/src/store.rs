use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use rusqlite::types::Value;

use crate::error::TabulaError;
use crate::id::{generate_id, is_valid_id};
use crate::types::{Issue, IssueFilter, IssueUpdate, NewIssue, timestamp};

/// Persistence seam for the issue service. Each call is one logical read
/// or write against the backing store.
pub trait IssueStore: Send {
    /// Issues of `project` matching every predicate in `filter`, in
    /// insertion order.
    fn find_by_filter(&self, project: &str, filter: &IssueFilter)
    -> Result<Vec<Issue>, TabulaError>;

    fn insert(&self, issue: NewIssue) -> Result<Issue, TabulaError>;

    /// Applies `update` and refreshes `updated_on`. Returns
    /// [`TabulaError::NotFound`] for unknown or malformed ids.
    fn update_by_id(&self, id: &str, update: &IssueUpdate) -> Result<Issue, TabulaError>;

    /// Returns [`TabulaError::NotFound`] for unknown or malformed ids.
    fn delete_by_id(&self, id: &str) -> Result<(), TabulaError>;

    fn close(self: Box<Self>) -> Result<(), TabulaError>;
}

pub const MEMORY: &str = ":memory:";

pub struct Db {
    conn: Connection,
}

fn parse_dt(idx: usize, s: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    timestamp::parse(s).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn issue_from_row(row: &rusqlite::Row) -> Result<Issue, rusqlite::Error> {
    let created_on_str: String = row.get("created_on")?;
    let updated_on_str: String = row.get("updated_on")?;
    let created_on_idx = row.as_ref().column_index("created_on")?;
    let updated_on_idx = row.as_ref().column_index("updated_on")?;

    Ok(Issue {
        id: row.get("id")?,
        issue_title: row.get("issue_title")?,
        issue_text: row.get("issue_text")?,
        created_by: row.get("created_by")?,
        assigned_to: row.get("assigned_to")?,
        status_text: row.get("status_text")?,
        open: row.get("is_open")?,
        created_on: parse_dt(created_on_idx, &created_on_str)?,
        updated_on: parse_dt(updated_on_idx, &updated_on_str)?,
        project: row.get("project")?,
    })
}

impl Db {
    /// Opens the store named by a connection string: a database file path,
    /// or `:memory:` for a store that lives as long as the handle.
    pub fn open(location: &str) -> Result<Db, TabulaError> {
        let conn = if location == MEMORY {
            Connection::open_in_memory()
        } else {
            let path = Path::new(location);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| {
                    TabulaError::Internal(format!("failed to create {}: {e}", parent.display()))
                })?;
            }
            Connection::open(path)
        }
        .map_err(|e| TabulaError::Internal(format!("failed to open database: {e}")))?;

        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| TabulaError::Internal(format!("failed to set busy_timeout: {e}")))?;

        Self::create_tables(&conn)?;

        Ok(Db { conn })
    }

    fn create_tables(conn: &Connection) -> Result<(), TabulaError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS issues (
                id          TEXT PRIMARY KEY,
                project     TEXT NOT NULL,
                issue_title TEXT NOT NULL CHECK (issue_title != ''),
                issue_text  TEXT NOT NULL CHECK (issue_text != ''),
                created_by  TEXT NOT NULL CHECK (created_by != ''),
                assigned_to TEXT NOT NULL DEFAULT '',
                status_text TEXT NOT NULL DEFAULT '',
                is_open     INTEGER NOT NULL DEFAULT 1,
                created_on  TEXT NOT NULL,
                updated_on  TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS issues_by_project ON issues(project);",
        )
        .map_err(|e| TabulaError::Internal(format!("failed to create tables: {e}")))?;

        Ok(())
    }
}

impl IssueStore for Db {
    fn find_by_filter(
        &self,
        project: &str,
        filter: &IssueFilter,
    ) -> Result<Vec<Issue>, TabulaError> {
        let mut clauses = vec!["project = ?"];
        let mut values: Vec<Value> = vec![Value::Text(project.to_string())];

        let text_filters = [
            ("id = ?", &filter.id),
            ("issue_title = ?", &filter.issue_title),
            ("issue_text = ?", &filter.issue_text),
            ("created_by = ?", &filter.created_by),
            ("assigned_to = ?", &filter.assigned_to),
            ("status_text = ?", &filter.status_text),
        ];
        for (clause, value) in text_filters {
            if let Some(v) = value {
                clauses.push(clause);
                values.push(Value::Text(v.clone()));
            }
        }
        if let Some(open) = filter.open {
            clauses.push("is_open = ?");
            values.push(Value::Integer(i64::from(open)));
        }
        if let Some(created_on) = &filter.created_on {
            clauses.push("created_on = ?");
            values.push(Value::Text(timestamp::format(created_on)));
        }
        if let Some(updated_on) = &filter.updated_on {
            clauses.push("updated_on = ?");
            values.push(Value::Text(timestamp::format(updated_on)));
        }

        let sql = format!(
            "SELECT * FROM issues WHERE {} ORDER BY rowid",
            clauses.join(" AND ")
        );

        let mut stmt = self
            .conn
            .prepare(&sql)
            .map_err(|e| TabulaError::Internal(format!("failed to prepare list query: {e}")))?;
        let issues = stmt
            .query_map(rusqlite::params_from_iter(values), issue_from_row)
            .map_err(|e| TabulaError::Internal(format!("failed to list issues: {e}")))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TabulaError::Internal(format!("failed to read issues: {e}")))?;

        Ok(issues)
    }

    fn insert(&self, new: NewIssue) -> Result<Issue, TabulaError> {
        let ts = timestamp::now();
        let issue = Issue {
            id: generate_id(),
            issue_title: new.issue_title,
            issue_text: new.issue_text,
            created_by: new.created_by,
            assigned_to: new.assigned_to,
            status_text: new.status_text,
            open: true,
            created_on: ts,
            updated_on: ts,
            project: new.project,
        };
        let ts_str = timestamp::format(&ts);

        self.conn
            .execute(
                "INSERT INTO issues (id, project, issue_title, issue_text, created_by, assigned_to, status_text, is_open, created_on, updated_on)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    issue.id,
                    issue.project,
                    issue.issue_title,
                    issue.issue_text,
                    issue.created_by,
                    issue.assigned_to,
                    issue.status_text,
                    issue.open,
                    ts_str,
                    ts_str,
                ],
            )
            .map_err(|e| TabulaError::Internal(format!("failed to create issue: {e}")))?;

        Ok(issue)
    }

    fn update_by_id(&self, id: &str, update: &IssueUpdate) -> Result<Issue, TabulaError> {
        if !is_valid_id(id) {
            return Err(TabulaError::NotFound(id.to_string()));
        }

        let mut set_clauses = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let text_fields = [
            ("issue_title = ?", &update.issue_title),
            ("issue_text = ?", &update.issue_text),
            ("created_by = ?", &update.created_by),
            ("assigned_to = ?", &update.assigned_to),
            ("status_text = ?", &update.status_text),
        ];
        for (clause, value) in text_fields {
            if let Some(v) = value {
                set_clauses.push(clause);
                values.push(Value::Text(v.clone()));
            }
        }
        if let Some(open) = update.open {
            set_clauses.push("is_open = ?");
            values.push(Value::Integer(i64::from(open)));
        }

        set_clauses.push("updated_on = ?");
        values.push(Value::Text(timestamp::format(&timestamp::now())));

        values.push(Value::Text(id.to_string()));

        let sql = format!(
            "UPDATE issues SET {} WHERE id = ? RETURNING *",
            set_clauses.join(", ")
        );

        self.conn
            .query_row(&sql, rusqlite::params_from_iter(values), issue_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => TabulaError::NotFound(id.to_string()),
                other => TabulaError::Internal(format!("failed to update issue: {other}")),
            })
    }

    fn delete_by_id(&self, id: &str) -> Result<(), TabulaError> {
        if !is_valid_id(id) {
            return Err(TabulaError::NotFound(id.to_string()));
        }

        let deleted = self
            .conn
            .execute("DELETE FROM issues WHERE id = ?1", rusqlite::params![id])
            .map_err(|e| TabulaError::Internal(format!("failed to delete issue: {e}")))?;

        if deleted == 0 {
            return Err(TabulaError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), TabulaError> {
        let Db { conn } = *self;
        conn.close()
            .map_err(|(_, e)| TabulaError::Internal(format!("failed to close database: {e}")))
    }
}
