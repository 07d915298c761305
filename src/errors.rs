use thiserror::Error;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("bad number: {0}")]
    ParseFloat(#[from] std::num::ParseFloatError),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("provider: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("abi: {0}")]
    Abi(#[from] ethers::abi::Error),

    #[error("abi signature: {0}")]
    AbiParse(#[from] ethers::abi::ParseError),

    #[error("json: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// Tick or fixed-point input outside the representable range.
    #[error("math: {0}")]
    Math(String),

    /// The whole batched call failed (node unreachable, malformed batch).
    #[error("transport: {0}")]
    Transport(String),
}
