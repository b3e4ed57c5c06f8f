pub mod cpu;
pub mod disk;
pub mod gpu;
pub mod systemd;

pub use cpu::CpuCollector;
pub use systemd::ServiceCatalogItem;
