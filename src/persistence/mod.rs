pub mod ticks_dao;
pub mod workers;

pub use workers::PersistenceWorker;
