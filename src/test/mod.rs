mod cache_hierarchy;
mod sim_time;
mod simulator;
mod stream_lifecycle;
