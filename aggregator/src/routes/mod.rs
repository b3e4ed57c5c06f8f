pub mod events;
pub mod history;
pub mod servers;
pub mod timeseries;
