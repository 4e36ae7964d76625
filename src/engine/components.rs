pub mod audio_meter;
pub mod capture;
pub mod channel;
pub mod echo;
pub mod eq;
pub mod master;
mod mixing;
pub mod parameter;
pub mod reverb;
pub mod spectrum;
pub mod stem;
pub mod transport;

pub use mixing::MixPoint;
