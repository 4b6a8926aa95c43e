pub mod model;
pub mod rank;

pub use model::*;
pub use rank::*;
