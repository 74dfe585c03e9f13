pub mod cache;
pub mod writer;

pub use cache::MappingCache;
pub use writer::CatalogWriter;
