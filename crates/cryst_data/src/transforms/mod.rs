pub mod core;
pub mod crystal;

pub use self::core::Transform;
pub use crystal::RandomTranslate;
