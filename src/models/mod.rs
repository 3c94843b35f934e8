pub mod assignment;
pub mod report;

pub use assignment::*;
pub use report::*;
