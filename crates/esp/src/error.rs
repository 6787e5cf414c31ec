use thiserror::Error;

#[derive(Error, Debug)]
pub enum EspError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Provider rejected batch: {0}")]
    Provider(String),

    #[error("SMTP injection failed: {0}")]
    Smtp(String),

    #[error("Adapter configuration error: {0}")]
    Config(String),

    #[error("Batch over budget: {0}")]
    OverBudget(String),
}
