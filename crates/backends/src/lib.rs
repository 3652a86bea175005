//! Backend job adapters.
//!
//! Every generation backend is driven through [`JobAdapter`]:
//!
//! - [`HailuoAdapter`]: video, completion by polling a status endpoint.
//! - [`SeedreamAdapter`]: images, one blocking call per job.
//! - [`LipSyncAdapter`]: ComfyUI lip-sync, completion pushed over the
//!   session's event stream.

pub mod adapter;
pub mod blocking;
pub mod data_url;
pub mod hailuo;
mod http;
pub mod lipsync;
pub mod polling;
pub mod seedream;

pub use adapter::{ImageRequest, JobAdapter, LipSyncRequest, VideoRequest};
pub use hailuo::{HailuoAdapter, HailuoConfig};
pub use lipsync::{LipSyncAdapter, LipSyncConfig};
pub use seedream::{SeedreamAdapter, SeedreamConfig};
