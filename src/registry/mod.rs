pub mod clock;
pub mod lifecycle;
pub mod ports;
pub mod record;
pub mod store;
