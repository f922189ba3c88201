pub mod encrypt;
pub mod refresh;
pub mod status;
pub mod tenants;
