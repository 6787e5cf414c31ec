use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Row decode failed: {0}")]
    Decode(String),

    #[error("Store misuse: {0}")]
    Config(String),
}

impl StoreError {
    /// True when the underlying error is Postgres "undefined table"
    /// (SQLSTATE 42P01). Recovery tolerates missing legacy tables.
    pub fn is_undefined_table(&self) -> bool {
        match self {
            Self::Sqlx(sqlx::Error::Database(db)) => {
                db.code().as_deref() == Some("42P01")
            }
            _ => false,
        }
    }
}
