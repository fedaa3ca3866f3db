//! Feedback flywheel: learner analytics back into generation.
//!
//! The [`FeedbackProcessor`] consumes an [`AnalyticsReport`](crate::analytics::AnalyticsReport)
//! for a stored capsule, builds a refinement hint from its suggestions and
//! error patterns, and asks a [`CapsuleGenerator`](crate::pipeline::CapsuleGenerator)
//! for a new version. Suggestions are processed once by fingerprint and
//! regenerations are rate-limited per lineage.

pub mod processor;

pub use processor::{
    refinement_hint, Disposition, FeedbackConfig, FeedbackProcessor, RegenerationPolicy,
    RegenerationRequest, RegenerationResult, SkipReason,
};
