pub mod config;
pub mod containers;
pub mod crds;
pub mod dispatch;
pub mod error;
pub mod quantity;
pub mod reconcile;
pub mod resources;
pub mod selector;
pub mod store;
pub mod vmsingle_controller;
