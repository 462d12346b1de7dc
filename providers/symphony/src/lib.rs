#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![forbid(unsafe_code)]

//! Certificate-authenticated client for the Symphony messaging platform:
//! token and directory caches, the datafeed poller and outbound messaging.

pub mod adapter;
pub mod api;
pub mod backoff;
pub mod cache;
pub mod codec;
pub mod config;
pub mod directory;
pub mod error;
pub mod feed;
pub mod telemetry;
pub mod tokens;
pub mod transport;
pub mod types;

pub use adapter::{Outbound, SymphonyAdapter};
pub use api::SymphonyClient;
pub use backoff::{Backoff, BackoffSettings, BackoffStep};
pub use codec::NormalizedMessage;
pub use config::{Credential, SymphonyConfig};
pub use directory::{
    DirectoryCache, DirectoryEntry, MemoryUserRegistry, SharedUserRegistry, UserLookup,
    UserQuery, UserRegistry,
};
pub use error::{SymphonyError, SymphonyResult};
pub use feed::{FeedClient, FeedEvent, FeedEvents, FeedState};
pub use tokens::{Token, TokenCache};
pub use transport::{Headers, ReqwestTransport, SharedTransport, Transport};
