pub mod job_run;
pub mod status;
