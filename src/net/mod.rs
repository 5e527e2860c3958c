//! Networking: UDP discovery beacons and the TCP peer mesh (§4.2, §4.3).

pub mod connection;
pub mod discovery;
