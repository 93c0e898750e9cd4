//! Discovery loop, peer exchange, and the parallel peer-address-source
//! combinator (spec §4.4, §4.5, §9).

pub mod loop_;
pub mod pex;
pub mod routing;

pub use loop_::DiscoveryLoop;
pub use pex::{handle_inbound_pex, request_pex, run_trigger_loop, ADDRESS_TTL};
pub use routing::{race_sources, AddressBookSource, IpfsApiSource, KadSource, PeerAddressSource, GRACE_WINDOW};
