#![forbid(unsafe_code)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]

//! Framed, acknowledged message protocol shared by the rollcall
//! coordinator and its workers.
//!
//! Every application message is a JSON [`Envelope`] carried in a frame
//! of 4 big-endian length bytes followed by the JSON payload, and is
//! answered by a 4-byte acknowledgement token before the next frame may
//! be sent. [`Channel`] implements both directions with bounded retry.

mod envelope;
mod error;
mod transport;

pub mod topic;

pub use envelope::{Envelope, FilePayload, wall_timestamp};
pub use error::ProtoError;
pub use transport::{Channel, MAX_ATTEMPTS, NACK_RETRY_LIMIT};
