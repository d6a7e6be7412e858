/// Transfer module - asynchronous uploads on dedicated transfer queues

pub mod queue_selection;
pub mod upload;
pub mod transfer_worker;

pub use queue_selection::select_transfer_queues;
pub use upload::{UploadState, UploadStatus};
pub use transfer_worker::TransferWorker;
