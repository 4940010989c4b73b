pub mod fitting;
pub mod physics;
pub mod preprocess;
pub mod quantitation;
pub mod session;

mod traits;

pub use traits::SpectrumTransform;
