use std::io;

/// The single error taxonomy shared by the Tracker, CAS client, Push Engine
/// and Fetch Engine.
///
/// `NoLink` is never constructed via `From` for an underlying error type: it
/// is only produced by [`crate::cas::Client`] sniffing a daemon error message,
/// keeping "absent" distinct from "failed" at the type level.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("a provider declined to supply this block")]
    NotProvided,

    #[error("no link named '{0}'")]
    NoLink(String),

    #[error("missing block for object {0}: no shunt entry")]
    MissingBlock(String),

    #[error("cas returned address '{returned}', expected '{expected}' for the hash-derived upload")]
    AddressMismatch { expected: String, returned: String },

    #[error("upload failed: {0}")]
    UploadFailed(String),

    #[error("download failed: {0}")]
    DownloadFailed(String),

    #[error("write failed: {0}")]
    WriteFailed(#[from] io::Error),

    #[error("tracker error: {0}")]
    TrackerError(String),

    #[error("failed to read git object: {0}")]
    ObjectReadFailed(#[from] git2::Error),

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("interrupted")]
    Interrupted,
}

impl Error {
    pub fn is_no_link(&self) -> bool {
        matches!(self, Error::NoLink(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
