use thiserror::Error;

use crate::device::FramebufferStatus;

/// Failures the render pipeline can run into.
///
/// Nothing inside the per-frame pipeline treats these as fatal: the pass
/// that hit the error logs it and produces no output for the frame.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to create {what}")]
    ResourceCreation { what: String },

    #[error("framebuffer for {pass} is incomplete: {status:?}")]
    FramebufferIncomplete {
        pass: &'static str,
        status: FramebufferStatus,
    },

    #[error("shader {name} failed to compile: {log}")]
    ShaderCompile { name: String, log: String },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),

    #[error("property {name} expects {expected} but was given {actual}")]
    PropertyTypeMismatch {
        name: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("unknown class {0}")]
    UnknownClass(String),

    #[error("class {0} is already registered")]
    DuplicateClass(String),

    #[error("class {class} has no property {property}")]
    UnknownProperty { class: String, property: String },

    #[error("no output target for {0}")]
    MissingTarget(String),
}

impl RenderError {
    pub(crate) fn creation(what: impl Into<String>) -> Self {
        Self::ResourceCreation { what: what.into() }
    }
}
