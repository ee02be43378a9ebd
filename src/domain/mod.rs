//! Bus-facing types shared by the requester, the responder and every
//! transport.
//!
//! Code outside this module imports these through the crate root or
//! `crate::domain`, never from `domain::transport` directly.

mod transport;

pub use transport::{
    //
    Channel,
    Envelope,
    SubscriptionHandle,
    Transport,
    TransportBase,
    TransportConfig,
    TransportPtr,
};
