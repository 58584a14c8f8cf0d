//! Model response lifecycle and its collaborators.

pub mod function;
pub mod lifecycle;
pub mod transcript;

pub use function::{FunctionCall, FunctionCallAccumulator, FunctionCallHandler};
pub use lifecycle::{ResponseLifecycle, ResponseState, Submission, UserInput};
pub use transcript::{TranscriptLine, TranscriptLog, TranscriptRole, TranscriptSink};
