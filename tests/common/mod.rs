#![allow(dead_code)]

use rust_sqlite_query::{
    describe, Backend, ColumnSet, DataType, DefaultValue, Executor, FieldDefinition, FromRow,
    Query, Record, RecordDefinition, Result, Row, SqliteBackend, SqliteConfig, Value,
};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub is_admin: bool,
    pub is_active: bool,
}

impl User {
    pub fn new(id: i64, name: &str, email: &str, age: i32, is_admin: bool, is_active: bool) -> Self {
        Self {
            id,
            name: name.to_string(),
            email: email.to_string(),
            age,
            is_admin,
            is_active,
        }
    }
}

impl FromRow for User {
    const COLUMNS: &'static [&'static str] =
        &["id", "name", "email", "age", "is_admin", "is_active"];

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            email: row.get(2)?,
            age: row.get(3)?,
            is_admin: row.get(4)?,
            is_active: row.get(5)?,
        })
    }
}

impl Record for User {
    fn definition() -> RecordDefinition {
        RecordDefinition::new("users")
            .field(FieldDefinition::new("id", DataType::Integer).primary_key())
            .field(FieldDefinition::new("name", DataType::Text).size(100))
            .field(FieldDefinition::new("email", DataType::Text).unique().not_null())
            .field(FieldDefinition::new("age", DataType::Integer))
            .field(
                FieldDefinition::new("isAdmin", DataType::Boolean)
                    .stored_as("is_admin")
                    .default_value(DefaultValue::Boolean(false)),
            )
            .field(
                FieldDefinition::new("isActive", DataType::Boolean)
                    .stored_as("is_active")
                    .default_value(DefaultValue::Boolean(true)),
            )
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("name", self.name.clone().into()),
            ("email", self.email.clone().into()),
            ("age", self.age.into()),
            ("is_admin", self.is_admin.into()),
            ("is_active", self.is_active.into()),
        ]
    }
}

/// Ad-hoc projection of two user columns
#[derive(Debug, Clone, PartialEq)]
pub struct NameEmail {
    pub name: String,
    pub email: String,
}

impl FromRow for NameEmail {
    const COLUMNS: &'static [&'static str] = &["name", "email"];

    fn from_row(row: &Row) -> Result<Self> {
        Ok(Self {
            name: row.get_named("name")?,
            email: row.get_named("email")?,
        })
    }
}

pub fn profiles_definition() -> RecordDefinition {
    RecordDefinition::new("profiles")
        .field(FieldDefinition::new("id", DataType::Integer).primary_key())
        .field(FieldDefinition::new("user_id", DataType::Integer).not_null())
        .field(FieldDefinition::new("age", DataType::Integer))
}

pub struct TestDb {
    pub db: SqliteBackend,
    pub users: ColumnSet,
    pub profiles: ColumnSet,
}

// Helper function to create an in-memory database for testing
pub fn create_test_db() -> Result<TestDb> {
    open_db(&SqliteConfig::in_memory(Vec::new()))
}

pub fn open_db(config: &SqliteConfig) -> Result<TestDb> {
    let mut db = SqliteBackend::open(config)?;
    let users = describe(&User::definition())?;
    let profiles = describe(&profiles_definition())?;
    db.apply_schema(&users)?;
    db.apply_schema(&profiles)?;
    Ok(TestDb {
        db,
        users,
        profiles,
    })
}

pub fn sample_users() -> Vec<User> {
    vec![
        User::new(1, "John", "john@example.com", 30, false, true),
        User::new(2, "Jane", "jane@example.com", 25, true, true),
        User::new(3, "Jim", "jim@x.com", 17, false, false),
        User::new(4, "Alice", "alice@example.com", 42, true, false),
        User::new(5, "Bob", "bob@test.org", 35, false, true),
    ]
}

pub fn seed(test: &mut TestDb) -> Result<()> {
    for user in sample_users() {
        test.db.insert(&Query::insert_record(&test.users, &user)?)?;
    }
    for (id, user_id, age) in [(1, 1, 30), (2, 3, 17), (3, 4, 42)] {
        let query = Query::insert(&test.profiles)
            .set("id", id)?
            .set("user_id", user_id)?
            .set("age", age)?;
        test.db.insert(&query)?;
    }
    Ok(())
}

pub fn ids(users: &[User]) -> Vec<i64> {
    users.iter().map(|u| u.id).collect()
}
