pub mod bot;
pub mod config;
pub mod db;
pub mod diff;
pub mod fibapi;
pub mod job;
pub mod locales;
pub mod model;
pub mod render;
