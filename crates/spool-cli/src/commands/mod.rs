pub mod common;
pub mod fingerprint;
pub mod resync;
pub mod site;
pub mod watch;
