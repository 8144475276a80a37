//! Command recording, submission and frame completion

pub mod command_list;
pub mod command_recorder;
pub mod fence;
pub mod frame_pipeline;

pub use command_list::{CommandListId, CommandListManager, CommandListState, FinalState, Retained};
pub use command_recorder::{CommandRecorder, VertexBufferBinding};
pub use fence::Fence;
pub use frame_pipeline::{FramePipeline, FrameTicket};
