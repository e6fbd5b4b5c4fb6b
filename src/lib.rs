pub mod bootstrap;
pub mod config;
pub mod directory;
pub mod discord;
pub mod grafana;
pub mod handlers;
pub mod model;
pub mod notifier;
pub mod reconcile;
pub mod report;
pub mod sync;
pub mod team_sync;
