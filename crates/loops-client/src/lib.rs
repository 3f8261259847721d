//! Client for the Loops email provider.
//!
//! [`LoopsApi`] is the seam reconcilers depend on; [`LoopsClient`] implements
//! it over HTTPS with bearer authentication.
//!
//! ```ignore
//! use loops_client::{LoopsClient, LoopsClientConfig, LoopsApi};
//!
//! let client = LoopsClient::new(LoopsClientConfig::new("api-key"))?;
//! client.add_to_mailing_list("user-uid", "list-id").await?;
//! ```

mod api;
mod client;
mod error;

pub use api::{ApiResponse, ContactRequest, LoopsApi};
pub use client::{DEFAULT_BASE_URL, LoopsClient, LoopsClientConfig};
pub use error::LoopsError;
