/// Errors that can occur while provisioning, configuring or probing a test network.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("provisioning failed: {0}")]
    Provision(String),

    #[error("link between '{a}' and '{b}' already exists")]
    DuplicateLink { a: String, b: String },

    #[error("unknown endpoint: {0}")]
    UnknownEndpoint(String),

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("datapath id {0} is already in use")]
    DuplicateDatapathId(String),

    #[error("MAC address {0} is assigned to more than one host")]
    DuplicateMac(String),

    #[error("invalid link: {0}")]
    InvalidLink(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("controller unreachable: {0}")]
    ControllerUnreachable(String),

    #[error("controller request failed with status {status}: {body}")]
    Request { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed controller response: {0}")]
    Protocol(String),

    #[error("probe could not be started: {0}")]
    ProbeSetup(String),

    #[error("policy did not propagate before the deadline: {0}")]
    PropagationTimeout(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is transport-level flakiness worth retrying locally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport(_))
    }

}

pub type Result<T> = std::result::Result<T, Error>;
