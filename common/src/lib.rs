pub mod capture;
pub mod config;
pub mod detection;
pub mod dispatch;
pub mod frame;
pub mod logging;
pub mod overlay;
pub mod roboflow;
pub mod terminal;
