//! Wire protocol identifiers (spec §6 "External Interfaces"), shared by every
//! crate that opens or accepts streams under them.

use libp2p::StreamProtocol;

pub fn forwarding_protocol() -> StreamProtocol {
    StreamProtocol::new("/hyprspace/0.0.1")
}

pub fn pex_protocol() -> StreamProtocol {
    StreamProtocol::new("/hyprspace/pex/0.0.1")
}

pub fn service_protocol() -> StreamProtocol {
    StreamProtocol::new("/hyprspace/service/0.0.1")
}
