use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid hex encoding: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("Invalid identifier length: {0} bytes (expected 32)")]
    InvalidLength(usize),

    #[error("Unknown discussion kind tag: {0}")]
    UnknownKind(i64),
}
