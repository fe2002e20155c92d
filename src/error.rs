use thiserror::Error;

pub use anyhow::Context;

pub type Result<T> = std::result::Result<T, FetchError>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("transport failure for {url}{}: {message}", describe_status(.status))]
    Transport {
        url: String,
        status: Option<u16>,
        message: String,
    },
    #[error("malformed response{}: {message}", describe_location(.page, .column, .row))]
    Format {
        page: Option<usize>,
        column: Option<String>,
        row: Option<usize>,
        message: String,
    },
    #[error("fetch cancelled before completion")]
    Cancelled,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn message<T: Into<String>>(msg: T) -> Self {
        FetchError::Message(msg.into())
    }

    pub fn validation<T: Into<String>>(msg: T) -> Self {
        FetchError::Validation(msg.into())
    }

    pub fn transport<U: Into<String>, M: Into<String>>(
        url: U,
        status: Option<u16>,
        message: M,
    ) -> Self {
        FetchError::Transport {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    /// Shape error not yet tied to a column or row.
    pub fn format<T: Into<String>>(msg: T) -> Self {
        FetchError::Format {
            page: None,
            column: None,
            row: None,
            message: msg.into(),
        }
    }

    pub fn coercion<C: Into<String>, M: Into<String>>(column: C, row: usize, message: M) -> Self {
        FetchError::Format {
            page: None,
            column: Some(column.into()),
            row: Some(row),
            message: message.into(),
        }
    }

    /// Attach the index of the page a format error came from, keeping any page already set.
    pub fn on_page(self, index: usize) -> Self {
        match self {
            FetchError::Format {
                page,
                column,
                row,
                message,
            } => FetchError::Format {
                page: page.or(Some(index)),
                column,
                row,
                message,
            },
            other => other,
        }
    }

    /// Only per-page transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transport { .. })
    }
}

fn describe_status(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

fn describe_location(page: &Option<usize>, column: &Option<String>, row: &Option<usize>) -> String {
    let mut parts = Vec::new();
    if let Some(page) = page {
        parts.push(format!("page {page}"));
    }
    if let Some(column) = column {
        parts.push(format!("column `{column}`"));
    }
    if let Some(row) = row {
        parts.push(format!("row {row}"));
    }

    if parts.is_empty() {
        String::new()
    } else {
        format!(" at {}", parts.join(", "))
    }
}
