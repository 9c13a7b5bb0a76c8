use crate::types::ApiError;
use reqwest::StatusCode;
use thiserror::Error;
use url::ParseError;

pub type Result<T, E = TornError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum TornError {
    /// The upstream body carried an `error` object.
    #[error("Torn API Error: code={}, message={}", .0.code, .0.error)]
    ApiError(ApiError),

    #[error("HTTP Status Error: status={status}, body={body}")]
    HttpStatusError { status: StatusCode, body: String },

    #[error("Parameter Required Error: Missing required parameter '{param}'")]
    ParameterRequiredError { param: String },

    #[error("Parameter Value Error: Invalid value '{value}' for parameter '{param}'. Allowed values: {allowed:?}")]
    ParameterValueError {
        param: String,
        value: String,
        allowed: Vec<String>,
    },

    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("HTTP Request Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),
}

impl TornError {
    pub(crate) fn required(param: &str) -> Self {
        TornError::ParameterRequiredError {
            param: param.to_string(),
        }
    }
}
