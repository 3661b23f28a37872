pub mod control_plane;
pub mod rover;
pub mod rover_config;
