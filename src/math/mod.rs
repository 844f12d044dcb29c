pub mod matrix;
pub mod volume;

pub use matrix::Matrix;
pub use volume::ChannelVolume;
