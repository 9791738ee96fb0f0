//! Error types for parameters, stages and the render graph.

use sw_gpu::{GpuError, ShaderError};
use sw_ir::{ConnectionRole, ParamName, StageId, ValueKind};
use thiserror::Error;

/// Failures of the parameter link protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("parameter {0} is already linked")]
    AlreadyLinked(ParamName),

    #[error("parameter {0} is not linked to that partner")]
    NotLinked(ParamName),

    #[error("cannot link {from} to {to}: {reason}")]
    KindMismatch {
        from: ParamName,
        to: ParamName,
        reason: &'static str,
    },

    #[error("cannot link {from} ({from_size:?}) to {to} ({to_size:?}): texture sizes differ")]
    SizeMismatch {
        from: ParamName,
        to: ParamName,
        from_size: (u32, u32),
        to_size: (u32, u32),
    },

    #[error("output interface has {outputs} parameters but stream interface has {streams}")]
    InterfaceMismatch { outputs: usize, streams: usize },

    #[error("parameter {0} does not belong to a stage")]
    Detached(ParamName),
}

/// Violations of the graph's wiring rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructureError {
    #[error("stage {from} is not connected to {to}")]
    NotConnected { from: StageId, to: StageId },

    #[error("stage {0} has more than one consumer; name the one to disconnect")]
    AmbiguousConsumer(StageId),

    #[error("stage {0} has more than one producer")]
    AmbiguousProducer(StageId),

    #[error("stage {0} is the terminal stage")]
    TerminalAnchor(StageId),

    #[error("stage {0} cannot be bridged: it needs exactly one consumer and at most one producer")]
    CannotBridge(StageId),

    #[error("stage {stage} references producer {missing} which was not supplied")]
    MissingStage { stage: StageId, missing: StageId },

    #[error("stages {producer} and {consumer} are not wired consistently")]
    InconsistentWiring {
        producer: StageId,
        consumer: StageId,
    },

    #[error("stage {0} does not feed the terminal stage")]
    Unreachable(StageId),

    #[error("terminal stage {0} has a consumer")]
    TerminalHasConsumer(StageId),

    #[error("wiring contains a cycle through {0:?}")]
    Cycle(Vec<StageId>),

    #[error("no stage without consumers")]
    NoTerminal,

    #[error("more than one stage without consumers: {0:?}")]
    MultipleTerminals(Vec<StageId>),

    #[error("stage {0} already belongs to the graph")]
    AlreadyAdopted(StageId),

    #[error("stage {0} is already wired to other stages")]
    AlreadyWired(StageId),

    #[error("stage {0} cannot connect to itself")]
    SelfConnection(StageId),

    #[error("stage {0} has no free stream input")]
    NoFreeStream(StageId),
}

/// Failures while allocating a stage's GPU resources.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("shader program for stage {stage} failed: {source}")]
    ShaderCompile {
        stage: String,
        #[source]
        source: GpuError,
    },

    #[error("stage {0} has no framebuffer")]
    MissingFramebuffer(String),

    #[error("stage {0} has no parameters")]
    NoParameters(String),

    #[error("parameter {name}: role {role} is not valid for a {kind}")]
    InvalidRole {
        name: ParamName,
        role: ConnectionRole,
        kind: &'static str,
    },

    #[error("parameter {0} is not declared by the shader program")]
    MissingBinding(ParamName),

    #[error("output parameter {0} has no color attachment")]
    Unattached(ParamName),

    #[error("{0} is not initialized")]
    NotInitialized(String),
}

/// Top-level error of the engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Link(#[from] LinkError),

    #[error(transparent)]
    Structure(#[from] StructureError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error("stage {stage} has no parameter {name}")]
    ParameterNotFound { stage: StageId, name: String },

    #[error("stage {0} not found")]
    StageNotFound(StageId),

    #[error("parameter {0} is computed on the GPU and cannot be set")]
    ReadOnly(ParamName),

    #[error("parameter {name} holds {expected} values, got {actual}")]
    ValueKind {
        name: ParamName,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("stage already has a parameter named {0}")]
    DuplicateParameter(ParamName),

    #[error("parameter name {0:?} is too long")]
    NameTooLong(String),

    #[error("color attachment {0} is unavailable")]
    AttachmentUnavailable(u32),

    #[error("invalid stage config: {0}")]
    InvalidConfig(String),

    #[error("multitrack join takes 1 to {max} tracks, got {requested}")]
    TrackCount { requested: usize, max: usize },

    #[error("stage {0} does not record or play a tape")]
    NotATape(StageId),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Shader(#[from] ShaderError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Convert a `&str` into a fixed-capacity parameter name.
pub fn param_name(name: &str) -> Result<ParamName> {
    ParamName::from(name).map_err(|_| Error::NameTooLong(name.to_string()))
}
