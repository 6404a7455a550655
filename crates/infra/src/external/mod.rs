//! External service clients/adapters.

pub mod introspection;

pub use introspection::{IntrospectionError, RemoteIntrospector};
