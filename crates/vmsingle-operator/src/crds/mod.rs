pub mod service_scrape;
pub mod vmsingle;
