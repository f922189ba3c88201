pub mod education_organization;
pub mod tenancy;
pub mod tenant_service;
