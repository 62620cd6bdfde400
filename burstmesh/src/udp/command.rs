//! Sentences carried inside UDP frames.

use std::sync::LazyLock;

use crate::sentence::SentenceTemplate;

static REGISTER: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Burst container asks for a key."));
static POLL: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Burst container %s asks for work."));
static FINISH: LazyLock<SentenceTemplate> = LazyLock::new(|| {
    SentenceTemplate::new("Burst container %s finished with the following result %s")
});
static RUN: LazyLock<SentenceTemplate> = LazyLock::new(|| SentenceTemplate::new("Run this.%s"));
static FETCH: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Fetch the result of burst %s."));
static PENDING: LazyLock<SentenceTemplate> =
    LazyLock::new(|| SentenceTemplate::new("Burst %s is pending."));

/// A request received on the task channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UdpCommand {
    /// A container asks for a slot key.
    Register,
    /// A container asks for the payload it should run.
    Poll {
        /// Container key.
        key: String,
    },
    /// A container reports its result.
    Finish {
        /// Container key.
        key: String,
        /// Result text.
        result: String,
    },
    /// A client submits a payload to any idle container.
    Run {
        /// Code to run.
        payload: String,
    },
    /// A client asks for the result of an earlier run.
    Fetch {
        /// Container key returned as pending.
        key: String,
    },
}

impl UdpCommand {
    /// Parse a frame payload. `None` for anything unrecognized.
    pub fn parse(text: &str) -> Option<Self> {
        if REGISTER.matches(text) {
            return Some(Self::Register);
        }
        // Finish before Poll: a result may end like a poll sentence.
        if let Ok(mut fields) = FINISH.scan(text) {
            let result = fields.pop()?;
            let key = fields.pop()?;
            return Some(Self::Finish { key, result });
        }
        if let Ok(mut fields) = POLL.scan(text) {
            return Some(Self::Poll { key: fields.pop()? });
        }
        if let Ok(mut fields) = FETCH.scan(text) {
            return Some(Self::Fetch { key: fields.pop()? });
        }
        if let Ok(mut fields) = RUN.scan(text) {
            return Some(Self::Run {
                payload: fields.pop()?,
            });
        }
        None
    }

    /// Sentence form of the command.
    pub fn to_sentence(&self) -> String {
        match self {
            Self::Register => REGISTER.print(&[]),
            Self::Poll { key } => POLL.print(&[key]),
            Self::Finish { key, result } => FINISH.print(&[key, result]),
            Self::Run { payload } => RUN.print(&[payload]),
            Self::Fetch { key } => FETCH.print(&[key]),
        }
    }
}

/// Reply telling a client its run is still going on `key`.
pub fn pending_reply(key: &str) -> String {
    PENDING.print(&[key])
}

/// Container key from a [`pending_reply`], if `text` is one.
pub fn parse_pending_reply(text: &str) -> Option<String> {
    PENDING.scan(text).ok()?.pop()
}
