pub mod pipeline;
pub mod project;
pub mod report;
pub mod run;
