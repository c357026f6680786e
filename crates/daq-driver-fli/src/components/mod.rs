pub mod acquisition;
pub mod assembly;
#[cfg(feature = "fli_hardware")]
#[allow(unsafe_code)]
pub mod connection;
pub mod cooling;
pub mod discovery;
pub mod filter_wheel;
pub mod handle;
pub mod keep_alive;
#[cfg(feature = "mock")]
pub mod mock;
pub mod sections;
