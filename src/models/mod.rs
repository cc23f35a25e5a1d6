mod attachment;
mod meeting;
mod participant;
mod user;

pub use attachment::*;
pub use meeting::*;
pub use participant::*;
pub use user::*;
