use super::error::OutputError;

/// Output session state machine.
///
/// State transitions:
/// ```text
/// closed → negotiating → streaming → draining → closed
///              ↓             ↓  ↑
///           closed         failed (reset → streaming, close → closed)
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Closed,
    Negotiating,
    Streaming,
    Draining,
    Failed(OutputError),
}

impl SessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Streaming)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Whether a device handle is held in this state.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Streaming | Self::Draining | Self::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Negotiating => "negotiating",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Failed(_) => "failed",
        }
    }
}
