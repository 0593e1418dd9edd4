pub mod merge_partition;
