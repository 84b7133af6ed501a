//! Wire format for the Teamlink connection protocol.
//!
//! Every message exchanged between two peers is a [`ConnectionMessage`]
//! wrapped in a [`NumberedMessage`] and encoded as CBOR. The index on the
//! wrapper exists purely for ordering and retransmission; protocol semantics
//! live entirely in the inner message.
//!
//! Identity records ([`Device`], [`Member`], [`IdentityClaim`]) are defined
//! here too because they travel inside claims and admissions. Secret-bearing
//! variants ([`DeviceWithSecrets`], [`UserWithSecrets`]) never appear in a
//! message; [`DeviceWithSecrets::redact`] produces the public form.

#![forbid(unsafe_code)]

pub mod codec;
pub mod error_type;
pub mod errors;
pub mod identity;
pub mod message;

pub use codec::{decode, encode};
pub use error_type::{ConnectionErrorType, ErrorPayload};
pub use errors::ProtocolError;
pub use identity::{
    Challenge, Device, DeviceWithSecrets, IdentityClaim, Member, ServerWithSecrets,
    UserWithSecrets,
};
pub use message::{ConnectionMessage, NumberedMessage};
