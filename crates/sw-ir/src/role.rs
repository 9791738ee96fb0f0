//! Connection roles of stage parameters.

use core::fmt;

/// How a parameter participates in a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    /// Host-settable, consumed by the shader, re-uploaded when changed.
    Input,
    /// Written by the shader and exposed to downstream stages.
    Output,
    /// Receives a link from an upstream output and is sampled by the shader.
    Passthrough,
    /// Set once before the first render and never re-uploaded.
    Initialization,
}

impl ConnectionRole {
    /// True for roles whose data is produced on the GPU rather than the host.
    pub fn is_computed(self) -> bool {
        matches!(self, ConnectionRole::Output | ConnectionRole::Passthrough)
    }
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionRole::Input => "INPUT",
            ConnectionRole::Output => "OUTPUT",
            ConnectionRole::Passthrough => "PASSTHROUGH",
            ConnectionRole::Initialization => "INITIALIZATION",
        };
        f.write_str(s)
    }
}
