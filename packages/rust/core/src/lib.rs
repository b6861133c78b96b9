//! Pipeline stages and orchestration for ContentForge.
//!
//! Each stage module exposes one operation over the repositories in
//! [`contentforge_storage`] and the services in [`contentforge_clients`];
//! [`pipeline`] chains them into resumable runs and [`actions`] exposes
//! every operation to front ends.

pub mod actions;
pub mod assembler;
pub mod batch;
pub mod clusterer;
pub mod context;
pub mod events;
pub mod extractor;
#[cfg(test)]
pub(crate) mod fakes;
pub mod ingest;
pub mod markup;
pub mod pipeline;
pub mod prompts;
pub mod publisher;
pub mod schemas;
pub mod scorer;
pub mod sections;
pub mod verifier;

pub use actions::{Action, ActionOutcome, dispatch};
pub use batch::{BatchReport, FeedBatch, ItemBatch, Outcome};
pub use context::{PipelineContext, ProgressReporter, Services, SilentProgress};
pub use events::{EventSink, PipelineEvent, RecordingEventSink, TracingEventSink};
pub use extractor::ExtractTarget;
pub use pipeline::{PipelineOutcome, RunOptions};
