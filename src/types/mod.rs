//! Type definitions for the click-fraud pipeline

pub mod event;
pub mod prediction;

pub use event::{ClickEvent, RawEvent, RowSchema, TimestampPolicy};
pub use prediction::{ClickVerdict, ModelOutput, ModelPredictions, Prediction, Verdict};
