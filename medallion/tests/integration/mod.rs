mod bronze_test;
mod local_store_test;
mod pipeline_test;
mod silver_test;
