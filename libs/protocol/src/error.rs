//! Protocol facade errors

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A process-wide facade already exists; the first installer wins
    #[error("Protocol facade already installed for this process")]
    AlreadyInstalled,

    /// `global()` was called before any facade was installed
    #[error("Protocol facade has not been installed")]
    NotInstalled,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
