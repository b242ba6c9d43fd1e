mod local_store_test;
mod pipeline_test;
