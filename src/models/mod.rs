pub mod allergen;
pub mod book;
pub mod enums;
pub mod patient;
pub mod recipe;
pub mod settings;

pub use allergen::*;
pub use book::*;
pub use enums::*;
pub use patient::*;
pub use recipe::*;
pub use settings::*;
