pub mod actor;
pub mod appointment;
pub mod sync_log;

pub use actor::{ActorKind, BackfillFilter, PatientProfile, PractitionerProfile};
pub use appointment::Appointment;
pub use sync_log::{CrmEvent, CrmSyncLog, NewCrmSyncLog};
