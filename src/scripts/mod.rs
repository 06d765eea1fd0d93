pub mod commitment;
pub mod funding;
pub mod htlc;

pub use commitment::*;
pub use funding::*;
pub use htlc::*;
