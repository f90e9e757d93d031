pub mod catalog;
pub mod change_capture;
pub mod configuration;
pub mod controller;
pub mod error_handling;
pub mod management;
pub mod session_management;
pub mod traffic_recording;
pub mod transaction;
pub mod web_interface;

pub use controller::Controller;
