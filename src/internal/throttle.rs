pub mod bandwidth_gate;
pub mod throttle_controller;
