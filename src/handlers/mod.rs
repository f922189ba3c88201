// Route handlers, one module per resource
pub mod jobs;
pub mod public;
pub mod tenants;
