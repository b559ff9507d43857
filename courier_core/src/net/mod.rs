//! Transport plumbing: buffered nonblocking channels over the readiness
//! poll, the fixed-size stream and datagram records, and the endpoint that
//! multiplexes all of it.

pub mod buffer;
pub mod channel;
pub mod endpoint;
pub mod frame;
pub mod measurement;
