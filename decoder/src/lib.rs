pub mod audio;
pub mod device;
pub mod error;
pub mod scaling_list;
pub mod v4l2;

pub use error::{DecoderError, Result};
