pub mod report;
pub mod run;
pub mod shell;
pub mod sweep;
