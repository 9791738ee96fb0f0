//! Stage and parameter identifiers.

use arrayvec::ArrayString;
use core::fmt;
use core::sync::atomic::{AtomicU32, Ordering};

/// Maximum length of a parameter name in bytes.
pub const PARAM_NAME_CAPACITY: usize = 32;

/// Fixed-capacity parameter name.
pub type ParamName = ArrayString<PARAM_NAME_CAPACITY>;

static NEXT_STAGE_ID: AtomicU32 = AtomicU32::new(1);

/// Stable numeric identifier of a render stage (`gid`).
///
/// Ids increase monotonically in creation order, which the graph uses as
/// the tie-break of its execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StageId(pub u32);

impl StageId {
    /// Allocate the next process-wide stage id.
    pub fn next() -> Self {
        StageId(NEXT_STAGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Reference to a parameter on some stage, resolved through the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParamRef {
    pub stage: StageId,
    pub name: ParamName,
}

impl ParamRef {
    pub fn new(stage: StageId, name: ParamName) -> Self {
        Self { stage, name }
    }
}

impl fmt::Display for ParamRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.stage, self.name)
    }
}
