//! Network transport
//!
//! - Delimiter-framed duplex TCP client ([`framer`])

pub mod framer;
