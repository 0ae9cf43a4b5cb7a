pub mod controller;
pub mod dispatch;
