pub mod education_organization;
pub mod ods_instance;

pub use education_organization::EducationOrganizationMirror;
pub use ods_instance::OdsInstance;
