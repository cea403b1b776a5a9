pub mod qinglong;
pub mod store;

pub use qinglong::QingLongStore;
pub use store::{CredentialStore, DisabledStore, EnvRecord};
