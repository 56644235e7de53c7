pub mod backends;
pub mod controller;
pub mod run;
