//! GPU work reconstruction from kernel job records and Vulkan submissions.

pub mod correlator;
pub mod tracker;

pub use correlator::{
    dxvk_group_id, GpuCorrelator, GpuStats, COMMAND_BUFFER_LABEL, HW_EXECUTION_LABEL,
    HW_QUEUE_LABEL, SW_QUEUE_LABEL,
};
pub use tracker::CommandBufferTracker;
