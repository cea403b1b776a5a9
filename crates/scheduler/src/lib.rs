pub mod keepalive;

pub use keepalive::KeepaliveScheduler;
