//! Transfer target discovery over the local network.
//!
//! Targets advertise themselves via mDNS under [`SERVICE_NAME`] with their
//! metadata in TXT records. A [`TargetWatcher`] browses for them and delivers
//! an add/update/remove event stream keyed by stable string identifiers;
//! [`TargetAdvertisement`] is the other side of the contract.

mod mdns;
mod metadata;
mod options;
mod target;
mod watcher;

pub use mdns::*;
pub use metadata::*;
pub use options::*;
pub use target::*;
pub use watcher::*;
