//! Vector store lifecycle on top of one backend adapter and an optional
//! owned lexical index, plus the factory entrypoints used by applications.

pub mod factory;
pub mod store;

pub use factory::{build_backend, create_vector_store, list_available_backends, validate_store_credentials};
pub use store::VectorStore;
