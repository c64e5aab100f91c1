use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::adapters::db::DbError;

const PERSON_COLUMNS: &str = "id, fname, lname, email, created_at, updated_at";

/// A `persons` row as stored. Timestamps stay in their RFC 3339 text form.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonRecord {
    pub id: i64,
    pub fname: String,
    pub lname: String,
    pub email: String,
    pub created_at: String,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertPersonParams<'a> {
    pub fname: &'a str,
    pub lname: &'a str,
    pub email: &'a str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdatePersonParams<'a> {
    pub id: i64,
    pub fname: &'a str,
    pub lname: &'a str,
    pub email: &'a str,
}

fn map_person_row(row: &Row<'_>) -> rusqlite::Result<PersonRecord> {
    Ok(PersonRecord {
        id: row.get(0)?,
        fname: row.get(1)?,
        lname: row.get(2)?,
        email: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

pub fn insert_person(
    connection: &Connection,
    new_person: &InsertPersonParams<'_>,
) -> Result<PersonRecord, DbError> {
    let sql = format!(
        "INSERT INTO persons (fname, lname, email) VALUES (?1, ?2, ?3) RETURNING {PERSON_COLUMNS}"
    );
    let record = connection.query_row(
        &sql,
        params![new_person.fname, new_person.lname, new_person.email],
        map_person_row,
    )?;

    Ok(record)
}

pub fn read_person(connection: &Connection, id: i64) -> Result<Option<PersonRecord>, DbError> {
    let sql = format!("SELECT {PERSON_COLUMNS} FROM persons WHERE id = ?1");
    let record = connection
        .query_row(&sql, params![id], map_person_row)
        .optional()?;

    Ok(record)
}

/// Returns `None` when no row has the given id.
pub fn update_person(
    connection: &Connection,
    update: &UpdatePersonParams<'_>,
) -> Result<Option<PersonRecord>, DbError> {
    let sql = format!(
        "UPDATE persons
         SET fname = ?1, lname = ?2, email = ?3,
             updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
         WHERE id = ?4
         RETURNING {PERSON_COLUMNS}"
    );
    let record = connection
        .query_row(
            &sql,
            params![update.fname, update.lname, update.email, update.id],
            map_person_row,
        )
        .optional()?;

    Ok(record)
}

/// Returns the number of rows removed.
pub fn delete_person(connection: &Connection, id: i64) -> Result<usize, DbError> {
    let affected = connection.execute("DELETE FROM persons WHERE id = ?1", params![id])?;
    Ok(affected)
}
