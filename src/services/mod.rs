//! Services
//!
//! Generation pipeline, assistant replies, the retry supervisor and the
//! HTTP surface.

pub mod assistant;
pub mod phase;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod supervisor;

pub use assistant::{Assistant, AssistantConfig, AssistantTask, ReplyEvent};
pub use phase::{GenerationConfig, GenerationPhase, PhasedGenerator};
pub use pipeline::{EventSink, EventStream, PipelineConfig, PipelineRunner};
pub use supervisor::{
    LocalSource, PipelineSource, RemoteSource, RetrySupervisor, SupervisorConfig, SupervisorError,
};
