//! Kernel functions and explicit kernel feature maps

pub mod homogeneous;
pub mod traits;

pub use self::homogeneous::*;
pub use self::traits::*;
