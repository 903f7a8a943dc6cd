pub mod invest;
pub mod reset;
pub mod simulate;
pub mod step;
pub mod sweep;
