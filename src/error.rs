use thiserror::Error;

/// Errors raised while decoding a parsed register buffer.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error("unsupported register encoding: {0}")]
    UnsupportedEncoding(String),
    #[error("buffer length {actual} does not match expected {expected} bytes")]
    BufferLength { expected: usize, actual: usize },
}

/// Errors raised by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("gateway {0} unreachable after retries")]
    GatewayUnreachable(String),
    #[error("modbus io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while reading one sensor.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("modbus request timed out")]
    ModbusTimeout,
    #[error("modbus exception response: {0}")]
    ModbusException(String),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Errors surfaced from the persistence port.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(String),
    #[error("required configuration row is missing")]
    ConfigMissing,
    #[error("fleet configuration error: {0}")]
    FleetConfig(String),
}

/// Errors raised while validating the license blob.
#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("license blob is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("license decryption failed: {0}")]
    Decrypt(String),
    #[error("license payload is not utf-8")]
    NotUtf8,
    #[error("license payload has the wrong shape, expected 4 `/`-separated fields")]
    Malformed,
    #[error("license server id does not match this machine's fingerprint")]
    FingerprintMismatch,
    #[error("enabled machine count {enabled} exceeds licensed total {licensed}")]
    MachineCountExceeded { enabled: usize, licensed: i64 },
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}
