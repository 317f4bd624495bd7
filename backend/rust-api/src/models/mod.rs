pub mod attempt;
pub mod case;
pub mod profile;
