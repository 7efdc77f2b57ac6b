//! Channel RPC between extension scripts and the host.
//!
//! A script-side [`Bridge`] sends [`BridgeMessage`]s keyed by operation and
//! extension; the host's [`HostEndpoint`] answers them in order from a
//! [`MiruContext`].

mod bridge;
mod context;
mod ops;
mod types;

pub use bridge::{Bridge, BridgeError, BridgeReceiver, BridgeResult, InvokeOptions};
pub use context::{Converter, HostUi, IdentityConverter, MiruContext, TracingUi};
pub use ops::{dispatch, HostEndpoint};
pub use types::{
    BridgeMessage, ChannelKey, HostError, HostReply, NodeScope, Operation, QueryOp,
    RequestOptions, XPathOp,
};
