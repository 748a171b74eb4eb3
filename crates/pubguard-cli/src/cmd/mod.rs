pub mod clear;
pub mod counters;
pub mod run;
