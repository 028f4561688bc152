pub mod descriptor_test;
