pub mod models;
pub mod store;
pub mod writer;

pub use store::OddsStore;
pub use writer::DbWriter;
