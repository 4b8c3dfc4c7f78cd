//! Topic strings of the coordinator/worker dialog.
//!
//! Topics are case-sensitive literals; both sides compare them exactly.

/// Coordinator greets a freshly accepted worker.
pub const HI: &str = "Hi";
/// Worker replies with its device name.
pub const SETUP: &str = "setup";
/// Coordinator hands out the assigned worker id.
pub const CLIENT_ID: &str = "Client Id";
/// Class register file push.
pub const CLASS_REGISTER: &str = "Class Register";
/// Number of model blobs about to follow.
pub const MODELS_COUNT: &str = "Models Count";
/// One model blob.
pub const PICKLE: &str = "Pickle";
/// Scheduling-mode announcement (`static` / `dynamic`).
pub const LOAD_BALANCING: &str = "Load Balancing";
/// Number of frames a worker will receive in static mode.
pub const STATIC_IMAGES_COUNT: &str = "Static Images Count";
/// One frame dispatched under the static policy.
pub const STATIC_IMAGE: &str = "Static Image";
/// One frame dispatched under the dynamic policy, or the end sentinel.
pub const DYNAMIC_TASK: &str = "Dynamic Task";
/// Worker's per-frame analysis result.
pub const PROCESSED_DATA: &str = "Processed Data";

/// `Dynamic Task` payload that ends a worker's task loop.
///
/// Compared case-insensitively on receipt.
pub const DONE_SENTINEL: &str = "done";
