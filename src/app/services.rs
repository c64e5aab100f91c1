use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use thiserror::Error;

use crate::adapters::db::{ConnectionPool, DbError};
use crate::adapters::persons::{self, InsertPersonParams, PersonRecord, UpdatePersonParams};
use crate::domain::models::{NewPersonInput, PersonView, UpdatePersonInput};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("person id not found")]
    NotFound,
    #[error("database operation failed: {0}")]
    Database(#[from] DbError),
}

pub trait PersonQueryHandler {
    fn read(&self, id: i64) -> Result<PersonView, ServiceError>;
}

/// Inputs are expected to be validated by the caller.
pub trait PersonCommandHandler {
    fn create(&self, new_person: &NewPersonInput) -> Result<PersonView, ServiceError>;
    fn update(&self, update: &UpdatePersonInput) -> Result<PersonView, ServiceError>;
    fn delete(&self, id: i64) -> Result<(), ServiceError>;
}

#[derive(Debug, Clone)]
pub struct SqlitePersonService {
    pool: Arc<ConnectionPool>,
}

impl SqlitePersonService {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    fn with_connection<T>(
        &self,
        op: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, ServiceError> {
        let connection = self.pool.acquire()?;
        op(&*connection).map_err(ServiceError::from)
    }
}

impl PersonQueryHandler for SqlitePersonService {
    fn read(&self, id: i64) -> Result<PersonView, ServiceError> {
        let record = self
            .with_connection(|connection| persons::read_person(connection, id))?
            .ok_or(ServiceError::NotFound)?;

        person_view(record)
    }
}

impl PersonCommandHandler for SqlitePersonService {
    fn create(&self, new_person: &NewPersonInput) -> Result<PersonView, ServiceError> {
        let record = self.with_connection(|connection| {
            persons::insert_person(
                connection,
                &InsertPersonParams {
                    fname: &new_person.first_name,
                    lname: &new_person.last_name,
                    email: &new_person.email,
                },
            )
        })?;

        person_view(record)
    }

    fn update(&self, update: &UpdatePersonInput) -> Result<PersonView, ServiceError> {
        let record = self
            .with_connection(|connection| {
                persons::update_person(
                    connection,
                    &UpdatePersonParams {
                        id: update.id,
                        fname: &update.first_name,
                        lname: &update.last_name,
                        email: &update.email,
                    },
                )
            })?
            .ok_or(ServiceError::NotFound)?;

        person_view(record)
    }

    fn delete(&self, id: i64) -> Result<(), ServiceError> {
        let affected = self.with_connection(|connection| persons::delete_person(connection, id))?;

        if affected == 0 {
            return Err(ServiceError::NotFound);
        }

        Ok(())
    }
}

fn person_view(record: PersonRecord) -> Result<PersonView, ServiceError> {
    let created_at = parse_timestamp("created_at", &record.created_at)?;
    let updated_at = record
        .updated_at
        .as_deref()
        .map(|value| parse_timestamp("updated_at", value))
        .transpose()?;

    Ok(PersonView {
        id: record.id,
        first_name: record.fname,
        last_name: record.lname,
        email: record.email,
        created_at,
        updated_at,
    })
}

fn parse_timestamp(column: &'static str, value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|timestamp| timestamp.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp {
            column,
            value: value.to_string(),
        })
}
