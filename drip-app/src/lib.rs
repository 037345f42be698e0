pub mod loopback;
pub mod settings;
