pub mod worker_manager_test;
