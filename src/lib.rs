pub mod browser;
pub mod codes;
pub mod config;
pub mod extract;
pub mod fetch;
pub mod navigate;
pub mod record;
pub mod run;
pub mod sink;
