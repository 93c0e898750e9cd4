//! Longest-prefix-match route table (spec §3 "Route Table", §4.2) and the
//! IPv4/IPv6 reroute override table consulted ahead of it (spec §4.2, §9).

pub mod reroute;
pub mod table;

pub use reroute::RerouteTable;
pub use table::RouteTable;
