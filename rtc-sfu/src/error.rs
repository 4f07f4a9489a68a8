use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("rtcp: block length {0} overruns remaining {1} bytes")]
    ErrRtcpBlockOverrun(usize, usize),
    #[error("rtcp: packet shorter than header")]
    ErrRtcpHeaderTooShort,
    #[error("invalid stream priority level: {0}")]
    ErrInvalidPriorityLevel(String),
    #[error("invalid bandwidth distribution config: {0}")]
    ErrInvalidDistributionConfig(String),
    #[error("unknown subscriber leg: {0}")]
    ErrUnknownLeg(String),
    #[error("subscriber leg already attached: {0}")]
    ErrLegAlreadyAttached(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::ErrInvalidDistributionConfig(e.to_string())
    }
}
