use thiserror::Error;

#[derive(Error, Debug)]
pub enum PennyError {
    #[error("Database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule file error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Mail parse error: {0}")]
    Mail(#[from] mailparse::MailParseError),

    #[error("Missing credential: {0} (set it in the environment or .env)")]
    MissingCredential(&'static str),

    #[error("Ledger API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, PennyError>;
