pub mod diff_chunk;
