//! Ephemeral event streams for live output and install progress.
//!
//! Each execution gets a single-consumer ordered channel of
//! [`OutputEvent`]s; each environment setup gets a channel of
//! [`InstallEvent`]s. Streams are terminated by a `Done` sentinel the
//! publishing side guarantees to emit, so a subscriber's wait can never
//! block forever. Nothing here is persisted.

use serde::Serialize;

pub mod registry;

pub use registry::ChannelRegistry;

// ---------------------------------------------------------------------------
// Output events
// ---------------------------------------------------------------------------

/// Source stream of one output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
    /// Terminal sentinel; always the last event on the channel.
    Done,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Done => "done",
        }
    }
}

/// One live output line from a running execution.
#[derive(Debug, Clone, Serialize)]
pub struct OutputEvent {
    pub stream: StreamKind,
    pub line: String,
}

impl OutputEvent {
    pub fn stdout(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stdout,
            line: line.into(),
        }
    }

    pub fn stderr(line: impl Into<String>) -> Self {
        Self {
            stream: StreamKind::Stderr,
            line: line.into(),
        }
    }

    pub fn done() -> Self {
        Self {
            stream: StreamKind::Done,
            line: String::new(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.stream == StreamKind::Done
    }
}

// ---------------------------------------------------------------------------
// Install events
// ---------------------------------------------------------------------------

/// Kind of one environment setup progress event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallEventKind {
    /// A pipeline stage started ("Creating environment", …).
    Step,
    /// Informational output from a stage.
    Log,
    /// A stage failed; the message carries the diagnostic.
    Error,
    /// Terminal sentinel; always the last event on the channel.
    Done,
}

/// One environment setup progress event.
#[derive(Debug, Clone, Serialize)]
pub struct InstallEvent {
    pub kind: InstallEventKind,
    pub message: String,
}

impl InstallEvent {
    pub fn step(message: impl Into<String>) -> Self {
        Self {
            kind: InstallEventKind::Step,
            message: message.into(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        Self {
            kind: InstallEventKind::Log,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: InstallEventKind::Error,
            message: message.into(),
        }
    }

    pub fn done(message: impl Into<String>) -> Self {
        Self {
            kind: InstallEventKind::Done,
            message: message.into(),
        }
    }

    pub fn is_done(&self) -> bool {
        self.kind == InstallEventKind::Done
    }
}

/// Live output channels keyed by execution id.
pub type OutputChannels = ChannelRegistry<OutputEvent>;

/// Install progress channels keyed by script id.
pub type InstallChannels = ChannelRegistry<InstallEvent>;
