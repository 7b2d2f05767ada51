//! A set of built-in tools that models can use.

mod calculate;
mod canned;

pub use calculate::{CalcError, CalculateTool, evaluate};
pub use canned::CannedTool;
