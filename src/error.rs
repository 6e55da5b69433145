use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("VPN config error: {0}")]
    Config(String),
    #[error("Could not resolve VPN server: {0}")]
    Resolve(String),
    #[error("Probe error: {0}")]
    Probe(String),
    #[error("SAML URL not found in OpenVPN output")]
    SamlUrlNotFound,
    #[error("Callback server error: {0}")]
    Callback(String),
    #[error("Browser error: {0}")]
    Browser(String),
    #[error("Process error: {0}")]
    Process(String),
    #[error("Settings error: {0}")]
    Settings(String),
}

pub type Result<T> = std::result::Result<T, AppError>;
