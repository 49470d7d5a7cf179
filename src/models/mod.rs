pub mod delegation;
pub mod feedback;
pub mod incident;
pub mod risk;

pub use delegation::*;
pub use feedback::*;
pub use incident::*;
pub use risk::*;
