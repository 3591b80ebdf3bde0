// Outbound HTTP clients for the three upstream capability endpoints.

pub mod atlas;
pub mod dustkid;
pub mod userdb;

pub use atlas::AtlasClient;
pub use dustkid::DustkidClient;
pub use userdb::UserDbClient;
