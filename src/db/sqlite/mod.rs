pub(crate) mod attachments;
mod common;
pub(crate) mod meetings;
pub(crate) mod participants;
pub(crate) mod roles;
pub(crate) mod users;

pub use attachments::AttachmentRepo;
pub use meetings::MeetingRepo;
pub use participants::ParticipantRepo;
pub use roles::RoleRepo;
pub use users::UserRepo;
