mod job_run_repo;

pub use job_run_repo::JobRunRepo;
