use crate::{api::Problem, presenter::ChallengeKind};

/// Crate-wide result type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for presenter and DNS resolver collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced while driving an ACME order.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Bad caller input, detected before any network call is made.
    #[error("configuration error: {0}")]
    Config(String),

    /// The agreement callback did not return the CA's current terms of service URL.
    #[error("You must agree to the ToS at '{current}'")]
    TermsOfService {
        current: String,
        agreed: Option<String>,
    },

    /// The CA answered with a problem document.
    #[error("{0}")]
    Api(Problem),

    /// A challenge ended in a terminal state other than `valid`.
    #[error("{kind} challenge for '{altname}' ended in state '{status}'{}", fmt_problem(.problem))]
    Challenge {
        altname: String,
        kind: ChallengeKind,
        status: String,
        problem: Option<Problem>,
    },

    /// A challenge never left `pending`/`processing`.
    #[error("challenge for '{altname}' stuck in bad pending/processing state after {attempts} polls")]
    StuckPending { altname: String, attempts: u32 },

    /// The CA answered a newOrder request with different identifiers.
    #[error("order identifiers mismatch: requested {requested:?}, CA returned {returned:?}")]
    IdentifierMismatch {
        requested: Vec<String>,
        returned: Vec<String>,
    },

    /// The CA answered with a well-formed but unusable resource.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The order failed during or after finalization.
    #[error(
        "order is in state '{status}'; requested {requested:?}, validated {validated:?}{}",
        fmt_problem(.problem)
    )]
    Order {
        status: String,
        requested: Vec<String>,
        validated: Vec<String>,
        problem: Option<Problem>,
    },

    /// The local self-test of a presenter did not see the expected value.
    #[error(
        "dry run of {kind} for '{altname}' failed: expected '{expected}' at '{target}', got {got:?}"
    )]
    DryRun {
        kind: ChallengeKind,
        altname: String,
        expected: String,
        got: Option<String>,
        target: String,
    },

    /// No enabled challenge kind can validate an identifier.
    #[error(
        "None of the challenge types that you've enabled ( {} ) are suitable for validating the domain you've selected ({identifier}). You must enable one of ( {} ).",
        .enabled.join(", "),
        .offered.join(", ")
    )]
    NoSuitableChallenge {
        identifier: String,
        offered: Vec<String>,
        enabled: Vec<String>,
    },

    /// A presenter or resolver collaborator failed.
    #[error("{kind} presenter failed: {source}")]
    Presenter {
        kind: ChallengeKind,
        #[source]
        source: BoxError,
    },

    /// Malformed key material, ASN.1 structure, CSR or PEM.
    #[error("codec error: {0}")]
    Codec(String),

    /// Signing failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// The HTTP collaborator failed before a response was received.
    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// An expected response header was absent.
    #[error("missing response header: {0}")]
    MissingHeader(&'static str),

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn codec(msg: impl Into<String>) -> Self {
        Error::Codec(msg.into())
    }

    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Returns the CA problem document carried by this error, if any.
    pub fn problem(&self) -> Option<&Problem> {
        match self {
            Error::Api(problem) => Some(problem),
            Error::Challenge { problem, .. } | Error::Order { problem, .. } => problem.as_ref(),
            _ => None,
        }
    }
}

impl From<Problem> for Error {
    fn from(problem: Problem) -> Self {
        Error::Api(problem)
    }
}

fn fmt_problem(problem: &Option<Problem>) -> String {
    match problem {
        Some(problem) => format!(": {problem}"),
        None => String::new(),
    }
}
