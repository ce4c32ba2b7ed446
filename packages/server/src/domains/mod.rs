// Business domains
pub mod crm;
